//! Private bytes of this process.

use crate::memory::MemoryProbe;
use std::mem::size_of;
use windows::Win32::System::ProcessStatus::{
    GetProcessMemoryInfo, PROCESS_MEMORY_COUNTERS, PROCESS_MEMORY_COUNTERS_EX,
};
use windows::Win32::System::Threading::GetCurrentProcess;

#[derive(Debug, Clone, Copy, Default)]
pub struct WindowsMemoryProbe;

impl MemoryProbe for WindowsMemoryProbe {
    fn private_bytes(&self) -> anyhow::Result<u64> {
        let mut counters = PROCESS_MEMORY_COUNTERS_EX {
            cb: size_of::<PROCESS_MEMORY_COUNTERS_EX>() as u32,
            ..Default::default()
        };
        unsafe {
            GetProcessMemoryInfo(
                GetCurrentProcess(),
                &mut counters as *mut PROCESS_MEMORY_COUNTERS_EX as *mut PROCESS_MEMORY_COUNTERS,
                counters.cb,
            )?;
        }
        Ok(counters.PrivateUsage as u64)
    }
}
