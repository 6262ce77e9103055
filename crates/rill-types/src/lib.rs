pub mod defaults;

//
// Types
//

/// Unique name of one deployed cluster instance.
pub type ClusterId = String;

pub type WorkerCount = u16;
pub type MemoryMb = u32;
pub type CpuCores = f64;
