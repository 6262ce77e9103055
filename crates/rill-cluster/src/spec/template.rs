//! The in-memory pod composite that the step pipeline shapes.

use std::path::Path;

use k8s_openapi::api::core::v1::{Container, Pod};

use super::SpecError;

/// Composite of a pod specification and its single main container.
///
/// Steps treat this as an immutable value: each one consumes the current
/// template and returns a new one with some fields overwritten, so steps can
/// be composed and tested independently. The main container is kept apart
/// from the pod until submission because most steps only touch one of the
/// two.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PodTemplate {
    pod: Pod,
    main_container: Container,
}

impl PodTemplate {
    pub fn new(pod: Pod, main_container: Container) -> Self {
        Self {
            pod,
            main_container,
        }
    }

    /// Seeds a template from a user-supplied pod manifest. The main
    /// container is looked up by name and removed from the pod's container
    /// list; it is folded back in by [`PodTemplate::into_pod`].
    pub fn from_template_file(
        path: impl AsRef<Path>,
        main_container_name: &str,
    ) -> Result<Self, SpecError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| SpecError::TemplateRead {
            path: path.display().to_string(),
            source,
        })?;
        let mut pod: Pod =
            serde_yaml::from_str(&content).map_err(|source| SpecError::TemplateParse {
                path: path.display().to_string(),
                source,
            })?;

        let mut main_container = Container::default();
        if let Some(pod_spec) = pod.spec.as_mut() {
            if let Some(position) = pod_spec
                .containers
                .iter()
                .position(|container| container.name == main_container_name)
            {
                main_container = pod_spec.containers.remove(position);
            }
        }

        Ok(Self {
            pod,
            main_container,
        })
    }

    pub fn pod(&self) -> &Pod {
        &self.pod
    }

    pub fn main_container(&self) -> &Container {
        &self.main_container
    }

    pub fn with_pod(self, pod: Pod) -> Self {
        Self { pod, ..self }
    }

    pub fn with_main_container(self, main_container: Container) -> Self {
        Self {
            main_container,
            ..self
        }
    }

    /// Folds the main container back into the pod, producing the wire-ready
    /// pod specification. Consumes the template; after this point the bundle
    /// owns the data.
    pub fn into_pod(self) -> Pod {
        let Self {
            mut pod,
            main_container,
        } = self;
        let pod_spec = pod.spec.get_or_insert_with(Default::default);
        pod_spec.containers.insert(0, main_container);
        pod
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_main_container_is_first_in_final_pod() {
        let mut sidecar = Container::default();
        sidecar.name = "metrics-proxy".to_owned();
        let mut pod = Pod::default();
        pod.spec.get_or_insert_with(Default::default).containers = vec![sidecar];

        let mut main = Container::default();
        main.name = "rill-coordinator".to_owned();

        let final_pod = PodTemplate::new(pod, main).into_pod();
        let containers = &final_pod.spec.expect("pod spec").containers;
        assert_eq!(containers.len(), 2);
        assert_eq!(containers[0].name, "rill-coordinator");
        assert_eq!(containers[1].name, "metrics-proxy");
    }

    #[test]
    fn test_template_file_extracts_main_container() {
        let manifest = r#"
apiVersion: v1
kind: Pod
metadata:
  name: seed
spec:
  containers:
    - name: rill-worker
      image: rillio/rill:0.4.2
    - name: log-shipper
      image: shipper:1.2
"#;
        let dir = std::env::temp_dir().join("rill-template-test");
        std::fs::create_dir_all(&dir).expect("temp dir");
        let path = dir.join("pod-template.yaml");
        std::fs::write(&path, manifest).expect("write template");

        let template =
            PodTemplate::from_template_file(&path, "rill-worker").expect("template loads");
        assert_eq!(template.main_container().name, "rill-worker");
        assert_eq!(
            template.pod().spec.as_ref().expect("spec").containers.len(),
            1
        );
    }

    #[test]
    fn test_missing_template_file_is_an_error() {
        let result = PodTemplate::from_template_file("/does/not/exist.yaml", "rill-worker");
        assert!(matches!(result, Err(SpecError::TemplateRead { .. })));
    }
}
