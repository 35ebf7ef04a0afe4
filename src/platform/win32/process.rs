//! Process command lines and parents via Toolhelp and NtQueryInformationProcess.

use crate::process::{ProcessCommandLineReader, ProcessError};
use std::mem::size_of;
use windows::core::PWSTR;
use windows::Wdk::System::Threading::{NtQueryInformationProcess, PROCESSINFOCLASS};
use windows::Win32::Foundation::{
    CloseHandle, E_ACCESSDENIED, E_INVALIDARG, HANDLE, STATUS_INFO_LENGTH_MISMATCH,
    UNICODE_STRING,
};
use windows::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, Process32FirstW, Process32NextW, PROCESSENTRY32W,
    TH32CS_SNAPPROCESS,
};
use windows::Win32::System::Threading::{
    OpenProcess, QueryFullProcessImageNameW, PROCESS_NAME_WIN32,
    PROCESS_QUERY_LIMITED_INFORMATION,
};

/// ProcessCommandLineInformation
const PROCESS_COMMAND_LINE_INFORMATION: PROCESSINFOCLASS = PROCESSINFOCLASS(60);

/// Closes the wrapped handle on drop.
struct OwnedHandle(HANDLE);

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.0);
        }
    }
}

fn open(pid: u32) -> Result<OwnedHandle, ProcessError> {
    unsafe {
        OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, false, pid)
            .map(OwnedHandle)
            .map_err(|e| match e.code() {
                code if code == E_ACCESSDENIED => ProcessError::AccessDenied { pid },
                code if code == E_INVALIDARG => ProcessError::Exited { pid },
                _ => ProcessError::Query {
                    pid,
                    reason: e.to_string(),
                },
            })
    }
}

/// Full image path of `pid`, if it can be opened.
pub fn image_path(pid: u32) -> Option<String> {
    let handle = open(pid).ok()?;
    let mut buffer = vec![0u16; 1024];
    let mut len = buffer.len() as u32;
    unsafe {
        QueryFullProcessImageNameW(
            handle.0,
            PROCESS_NAME_WIN32,
            PWSTR(buffer.as_mut_ptr()),
            &mut len,
        )
        .ok()?;
    }
    Some(String::from_utf16_lossy(&buffer[..len as usize]))
}

/// Reader backed by the Win32 process APIs.
#[derive(Debug, Clone, Copy, Default)]
pub struct ToolhelpProcessReader;

impl ProcessCommandLineReader for ToolhelpProcessReader {
    fn command_line(&self, pid: u32) -> Result<String, ProcessError> {
        let handle = open(pid)?;
        let query_err = |reason: String| ProcessError::Query { pid, reason };

        unsafe {
            let mut needed = 0u32;
            let status = NtQueryInformationProcess(
                handle.0,
                PROCESS_COMMAND_LINE_INFORMATION,
                std::ptr::null_mut(),
                0,
                &mut needed,
            );
            if status != STATUS_INFO_LENGTH_MISMATCH || needed == 0 {
                return Err(query_err(format!("unexpected status {:#x}", status.0)));
            }

            // u64 backing keeps the UNICODE_STRING header aligned.
            let mut buffer = vec![0u64; (needed as usize).div_ceil(8)];
            NtQueryInformationProcess(
                handle.0,
                PROCESS_COMMAND_LINE_INFORMATION,
                buffer.as_mut_ptr().cast(),
                needed,
                &mut needed,
            )
            .ok()
            .map_err(|e| query_err(e.to_string()))?;

            let header = &*(buffer.as_ptr() as *const UNICODE_STRING);
            if header.Buffer.is_null() || header.Length == 0 {
                return Ok(String::new());
            }
            let chars = std::slice::from_raw_parts(
                header.Buffer.0,
                header.Length as usize / size_of::<u16>(),
            );
            Ok(String::from_utf16_lossy(chars))
        }
    }

    fn parent_id(&self, pid: u32) -> Result<u32, ProcessError> {
        unsafe {
            let snapshot = CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0)
                .map(OwnedHandle)
                .map_err(|e| ProcessError::Query {
                    pid,
                    reason: e.to_string(),
                })?;

            let mut entry = PROCESSENTRY32W {
                dwSize: size_of::<PROCESSENTRY32W>() as u32,
                ..Default::default()
            };
            let mut found = Process32FirstW(snapshot.0, &mut entry).is_ok();
            while found {
                if entry.th32ProcessID == pid {
                    return Ok(entry.th32ParentProcessID);
                }
                found = Process32NextW(snapshot.0, &mut entry).is_ok();
            }
        }
        Err(ProcessError::Exited { pid })
    }
}
