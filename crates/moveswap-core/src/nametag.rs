//! Program tag prepended to the local player's online name while attached

use tracing::debug;

use crate::error::Result;
use crate::process::{ReadMemory, WriteMemory};

/// Size of the target's username buffer
pub const USERNAME_LEN: usize = 32;

pub const NAME_TAG: &[u8] = b"[MS]";

pub type Username = [u8; USERNAME_LEN];

fn is_blank(name: &Username) -> bool {
    name[0] == 0
}

pub fn contains_tag(name: &Username) -> bool {
    name.windows(NAME_TAG.len()).any(|w| w == NAME_TAG)
}

/// Tagged copy of `name`, `None` if it is blank or already tagged.
///
/// The name is shifted right and truncated at the buffer end.
pub fn apply_tag(name: &Username) -> Option<Username> {
    if is_blank(name) || contains_tag(name) {
        return None;
    }
    let mut tagged = [0u8; USERNAME_LEN];
    tagged[..NAME_TAG.len()].copy_from_slice(NAME_TAG);
    tagged[NAME_TAG.len()..].copy_from_slice(&name[..USERNAME_LEN - NAME_TAG.len()]);
    Some(tagged)
}

/// Copy of `name` without its leading tag, `None` if it does not start with it
pub fn strip_tag(name: &Username) -> Option<Username> {
    if is_blank(name) || !name.starts_with(NAME_TAG) {
        return None;
    }
    let mut stripped = [0u8; USERNAME_LEN];
    stripped[..USERNAME_LEN - NAME_TAG.len()].copy_from_slice(&name[NAME_TAG.len()..]);
    Some(stripped)
}

pub fn read_username<M: ReadMemory + ?Sized>(memory: &M, address: u64) -> Result<Username> {
    let bytes = memory.read_bytes(address, USERNAME_LEN)?;
    let mut name = [0u8; USERNAME_LEN];
    let len = bytes.len().min(USERNAME_LEN);
    name[..len].copy_from_slice(&bytes[..len]);
    Ok(name)
}

/// Tag the username at `address`. Returns `true` if it was changed.
pub fn tag_username<M: ReadMemory + WriteMemory + ?Sized>(
    memory: &M,
    address: u64,
) -> Result<bool> {
    let Some(tagged) = apply_tag(&read_username(memory, address)?) else {
        return Ok(false);
    };
    memory.write_bytes(address, &tagged)?;
    debug!("Username changed to {}", display_name(&tagged));
    Ok(true)
}

/// Remove the tag from the username at `address`. Returns `true` if it was
/// changed.
pub fn untag_username<M: ReadMemory + WriteMemory + ?Sized>(
    memory: &M,
    address: u64,
) -> Result<bool> {
    let Some(stripped) = strip_tag(&read_username(memory, address)?) else {
        return Ok(false);
    };
    memory.write_bytes(address, &stripped)?;
    debug!("Username changed back to {}", display_name(&stripped));
    Ok(true)
}

pub fn display_name(name: &Username) -> String {
    let end = name.iter().position(|&b| b == 0).unwrap_or(USERNAME_LEN);
    String::from_utf8_lossy(&name[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::MockProcess;

    fn username(s: &str) -> Username {
        let mut name = [0u8; USERNAME_LEN];
        name[..s.len()].copy_from_slice(s.as_bytes());
        name
    }

    #[test]
    fn test_apply_and_strip() {
        let tagged = apply_tag(&username("Kazuya")).unwrap();
        assert_eq!(display_name(&tagged), "[MS]Kazuya");
        assert_eq!(display_name(&strip_tag(&tagged).unwrap()), "Kazuya");
    }

    #[test]
    fn test_idempotent() {
        let tagged = apply_tag(&username("Kazuya")).unwrap();
        assert!(apply_tag(&tagged).is_none());

        let stripped = strip_tag(&tagged).unwrap();
        assert!(strip_tag(&stripped).is_none());
    }

    #[test]
    fn test_blank_name_untouched() {
        assert!(apply_tag(&[0u8; USERNAME_LEN]).is_none());
        assert!(strip_tag(&[0u8; USERNAME_LEN]).is_none());
    }

    #[test]
    fn test_long_name_truncated() {
        let long = [b'a'; USERNAME_LEN];
        let tagged = apply_tag(&long).unwrap();
        assert!(tagged.starts_with(NAME_TAG));
        assert_eq!(tagged[USERNAME_LEN - 1], b'a');

        let stripped = strip_tag(&tagged).unwrap();
        assert_eq!(&stripped[..USERNAME_LEN - NAME_TAG.len()], &long[NAME_TAG.len()..]);
        assert!(stripped[USERNAME_LEN - NAME_TAG.len()..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_tag_in_middle_is_not_stripped() {
        let name = username("Jin[MS]");
        assert!(contains_tag(&name));
        assert!(apply_tag(&name).is_none());
        assert!(strip_tag(&name).is_none());
    }

    #[test]
    fn test_tag_and_untag_in_memory() {
        let process = MockProcess::new(1);
        let address = 0x5000;
        process.write_bytes(address, &username("Lili")).unwrap();

        assert!(tag_username(&process, address).unwrap());
        assert!(!tag_username(&process, address).unwrap());
        assert_eq!(
            display_name(&read_username(&process, address).unwrap()),
            "[MS]Lili"
        );

        assert!(untag_username(&process, address).unwrap());
        assert!(!untag_username(&process, address).unwrap());
        assert_eq!(
            display_name(&read_username(&process, address).unwrap()),
            "Lili"
        );
    }
}
