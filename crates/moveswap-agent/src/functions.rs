//! Locating the target functions the agent hooks or calls

use std::collections::BTreeMap;

use moveswap_core::addresses::names;
use moveswap_core::{Error, GameAddresses, ReadMemory, Result, Title};
use tracing::{debug, info};

/// Module name used in errors about target functions
const TARGET_MODULE: &str = "main module";

/// Function addresses found in the target's main module
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocatedFunctions {
    addresses: BTreeMap<String, u64>,
}

impl LocatedFunctions {
    /// Scan the main module for every function the title uses.
    ///
    /// Fails if a required function is missing; optional ones are skipped.
    pub fn locate<R: ReadMemory + ?Sized>(
        reader: &R,
        module_base: u64,
        module_size: usize,
        addresses: &GameAddresses,
        title: &dyn Title,
    ) -> Result<Self> {
        let mut located = Self::default();

        for &name in title.required_functions() {
            let address = addresses.locate_function(reader, module_base, module_size, name)?;
            located.addresses.insert(name.to_string(), address);
        }

        for &name in title.optional_functions() {
            if !addresses.has_function(name) {
                debug!("No signature for optional function {}", name);
                continue;
            }
            match addresses.locate_function(reader, module_base, module_size, name) {
                Ok(address) => {
                    located.addresses.insert(name.to_string(), address);
                }
                Err(e) => debug!("Optional function {} not located: {}", name, e),
            }
        }

        info!("Located {} target functions", located.addresses.len());
        Ok(located)
    }

    pub fn get(&self, name: &str) -> Option<u64> {
        self.addresses.get(name).copied()
    }

    pub fn require(&self, name: &str) -> Result<u64> {
        self.get(name).ok_or_else(|| Error::SymbolNotFound {
            module: TARGET_MODULE.to_string(),
            symbol: name.to_string(),
        })
    }

    /// Address of the local player list, read from the RIP-relative operand
    /// inside the player lookup function
    pub fn player_list<R: ReadMemory + ?Sized>(
        &self,
        reader: &R,
        addresses: &GameAddresses,
    ) -> Result<u64> {
        let function = self.require(names::GET_PLAYER_FROM_ID)?;
        addresses.reference(names::PLAYER_LIST)?.resolve(reader, function)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.addresses.iter().map(|(name, &address)| (name.as_str(), address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use moveswap_core::process::MockProcess;
    use moveswap_core::title::TitleT7;
    use moveswap_core::{FunctionSignature, WriteMemory};

    const BASE: u64 = 0x1_4000_0000;
    const SIZE: usize = 0x4000;

    /// Each function starts with a unique 4-byte marker
    fn image_with(markers: &[(&str, u64, [u8; 4])]) -> (MockProcess, GameAddresses) {
        let process = MockProcess::new(1);
        let mut addresses = TitleT7.default_addresses();
        for (name, offset, marker) in markers {
            process.write_bytes(BASE + offset, marker).unwrap();
            let pattern = marker
                .iter()
                .map(|b| format!("{:02X}", b))
                .collect::<Vec<_>>()
                .join(" ");
            addresses
                .functions
                .insert(name.to_string(), FunctionSignature::new(&pattern));
        }
        (process, addresses)
    }

    fn required() -> Vec<(&'static str, u64, [u8; 4])> {
        vec![
            (names::APPLY_NEW_MOVESET, 0x100, [0xA1, 0x01, 0x02, 0x03]),
            (names::MATCHED_AS_CLIENT, 0x200, [0xA2, 0x01, 0x02, 0x03]),
            (names::MATCHED_AS_HOST, 0x300, [0xA3, 0x01, 0x02, 0x03]),
            (names::GET_SYNC_BATTLE_START, 0x400, [0xA4, 0x01, 0x02, 0x03]),
            (names::GET_PLAYER_FROM_ID, 0x500, [0xA5, 0x01, 0x02, 0x03]),
        ]
    }

    #[test]
    fn test_locates_required_and_optional() {
        let mut markers = required();
        markers.push((names::UI_RANDOM_STAGE, 0x600, [0xA6, 0x01, 0x02, 0x03]));
        let (process, addresses) = image_with(&markers);

        let located = LocatedFunctions::locate(&process, BASE, SIZE, &addresses, &TitleT7).unwrap();
        assert_eq!(located.get(names::APPLY_NEW_MOVESET), Some(BASE + 0x100));
        assert_eq!(located.get(names::UI_RANDOM_STAGE), Some(BASE + 0x600));
        assert_eq!(located.get(names::LOAD_START), None);
        assert_eq!(located.iter().count(), 6);
    }

    #[test]
    fn test_missing_required_function_fails() {
        let mut markers = required();
        markers.remove(0);
        let (process, addresses) = image_with(&markers);

        let err = LocatedFunctions::locate(&process, BASE, SIZE, &addresses, &TitleT7).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_optional_signature_not_found_is_skipped() {
        let (process, mut addresses) = image_with(&required());
        addresses.functions.insert(
            names::LOAD_START.to_string(),
            FunctionSignature::new("EE EE EE EE"),
        );

        let located = LocatedFunctions::locate(&process, BASE, SIZE, &addresses, &TitleT7).unwrap();
        assert_eq!(located.get(names::LOAD_START), None);
        assert!(matches!(
            located.require(names::LOAD_START),
            Err(Error::SymbolNotFound { .. })
        ));
    }

    #[test]
    fn test_player_list_from_rip_operand() {
        let (process, addresses) = image_with(&required());
        let function = BASE + 0x500;
        // lea rcx, [rip + 0x1000] with the displacement at +11, next
        // instruction at +15
        process
            .write_bytes(function + 11, &0x1000u32.to_le_bytes())
            .unwrap();

        let located = LocatedFunctions::locate(&process, BASE, SIZE, &addresses, &TitleT7).unwrap();
        assert_eq!(
            located.player_list(&process, &addresses).unwrap(),
            function + 15 + 0x1000
        );
    }
}
