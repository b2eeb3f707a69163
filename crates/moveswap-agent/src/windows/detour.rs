//! Inline hooks: an absolute jump over the target's prologue, and a
//! trampoline holding the relocated prologue

use std::ffi::c_void;
use std::sync::atomic::{AtomicBool, Ordering};

use iced_x86::{Decoder, DecoderOptions, Encoder};
use moveswap_core::{Error, Result};
use tracing::debug;
use windows::Win32::System::Diagnostics::Debug::FlushInstructionCache;
use windows::Win32::System::Memory::{
    MEM_COMMIT, MEM_RESERVE, PAGE_EXECUTE_READWRITE, PAGE_PROTECTION_FLAGS, VirtualAlloc,
    VirtualProtect,
};
use windows::Win32::System::Threading::GetCurrentProcess;

/// `jmp qword ptr [rip+0]` followed by the destination
const ABS_JMP_LEN: usize = 14;

const TRAMPOLINE_SIZE: usize = 64;

/// Longest x86-64 instruction
const MAX_INSTRUCTION_LEN: usize = 15;

const ALLOC_STEP: u64 = 0x10000;
const ALLOC_MAX_DISTANCE: u64 = 0x7FFF_0000;

fn abs_jump(destination: u64) -> [u8; ABS_JMP_LEN] {
    let mut code = [0u8; ABS_JMP_LEN];
    code[..6].copy_from_slice(&[0xFF, 0x25, 0x00, 0x00, 0x00, 0x00]);
    code[6..].copy_from_slice(&destination.to_le_bytes());
    code
}

/// One installed (or installable) inline hook
pub struct Detour {
    name: String,
    target: u64,
    trampoline: u64,
    patch: [u8; ABS_JMP_LEN],
    original: Vec<u8>,
    enabled: AtomicBool,
}

impl Detour {
    /// Build the trampoline for `target`, leaving the target untouched until
    /// [`Detour::enable`]
    pub fn create(name: &str, target: u64, detour: u64) -> Result<Self> {
        let fail = |message: String| Error::HookFailed {
            name: name.to_string(),
            message,
        };

        // SAFETY: target points into the target's mapped code section.
        let code = unsafe {
            std::slice::from_raw_parts(target as *const u8, ABS_JMP_LEN + MAX_INSTRUCTION_LEN)
        };
        let trampoline = allocate_near(target, TRAMPOLINE_SIZE).map_err(&fail)?;
        let stolen = relocate(code, target, trampoline).map_err(&fail)?;
        let relocated = stolen.code.len();
        if relocated + ABS_JMP_LEN > TRAMPOLINE_SIZE {
            return Err(fail(format!("relocated prologue is {} bytes", relocated)));
        }

        let back = abs_jump(target + stolen.length as u64);
        // SAFETY: the trampoline was just allocated with TRAMPOLINE_SIZE bytes.
        unsafe {
            let dest = trampoline as *mut u8;
            std::ptr::copy_nonoverlapping(stolen.code.as_ptr(), dest, relocated);
            std::ptr::copy_nonoverlapping(back.as_ptr(), dest.add(relocated), ABS_JMP_LEN);
        }

        debug!(
            "Trampoline for {} at {:#x} ({} bytes stolen)",
            name, trampoline, stolen.length
        );
        Ok(Self {
            name: name.to_string(),
            target,
            trampoline,
            patch: abs_jump(detour),
            original: code[..stolen.length].to_vec(),
            enabled: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Address that behaves like the unhooked function
    pub fn trampoline(&self) -> u64 {
        self.trampoline
    }

    pub fn enable(&self) -> Result<()> {
        if self.enabled.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // Pad with int3 so no partial instruction follows the jump
        let mut patch = vec![0xCC; self.original.len()];
        patch[..ABS_JMP_LEN].copy_from_slice(&self.patch);
        write_code(self.target, &patch).map_err(|message| Error::HookFailed {
            name: self.name.clone(),
            message,
        })
    }

    pub fn disable(&self) -> Result<()> {
        if !self.enabled.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        write_code(self.target, &self.original).map_err(|message| Error::HookFailed {
            name: self.name.clone(),
            message,
        })
    }
}

struct Stolen {
    /// Bytes taken from the target
    length: usize,
    /// The same instructions encoded at the trampoline
    code: Vec<u8>,
}

/// Re-encode whole instructions from `code` (at `source`) at `dest` until at
/// least [`ABS_JMP_LEN`] bytes are covered
fn relocate(code: &[u8], source: u64, dest: u64) -> std::result::Result<Stolen, String> {
    let mut decoder = Decoder::with_ip(64, code, source, DecoderOptions::NONE);
    let mut stolen = Stolen {
        length: 0,
        code: Vec::new(),
    };

    for instr in &mut decoder {
        if instr.is_invalid() {
            return Err(format!("invalid instruction at {:#x}", instr.ip()));
        }
        let mut encoder = Encoder::new(64);
        encoder
            .encode(&instr, dest + stolen.code.len() as u64)
            .map_err(|e| format!("cannot relocate {:#x}: {}", instr.ip(), e))?;
        stolen.code.extend_from_slice(&encoder.take_buffer());
        stolen.length += instr.len();
        if stolen.length >= ABS_JMP_LEN {
            return Ok(stolen);
        }
    }
    Err("prologue too short".to_string())
}

/// Executable memory within rel32 reach of `target`
fn allocate_near(target: u64, size: usize) -> std::result::Result<u64, String> {
    let mut distance = ALLOC_STEP;
    while distance <= ALLOC_MAX_DISTANCE {
        for candidate in [target.checked_sub(distance), target.checked_add(distance)]
            .into_iter()
            .flatten()
        {
            let hint = candidate & !(ALLOC_STEP - 1);
            // SAFETY: VirtualAlloc at a hint either succeeds or returns null.
            let memory = unsafe {
                VirtualAlloc(
                    Some(hint as *const c_void),
                    size,
                    MEM_COMMIT | MEM_RESERVE,
                    PAGE_EXECUTE_READWRITE,
                )
            };
            if !memory.is_null() {
                return Ok(memory as u64);
            }
        }
        distance += ALLOC_STEP;
    }
    Err(format!("no free memory near {:#x}", target))
}

fn write_code(address: u64, data: &[u8]) -> std::result::Result<(), String> {
    let ptr = address as *const c_void;
    // SAFETY: address points to data.len() bytes of the target's code; the
    // protection is restored afterwards.
    unsafe {
        let mut old_protect = PAGE_PROTECTION_FLAGS(0);
        VirtualProtect(ptr, data.len(), PAGE_EXECUTE_READWRITE, &mut old_protect)
            .map_err(|e| format!("VirtualProtect failed: {}", e))?;
        std::ptr::copy_nonoverlapping(data.as_ptr(), address as *mut u8, data.len());
        let _ = VirtualProtect(ptr, data.len(), old_protect, &mut old_protect);
        let _ = FlushInstructionCache(GetCurrentProcess(), Some(ptr), data.len());
    }
    Ok(())
}
