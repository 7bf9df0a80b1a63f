//! Arena indices and persistent identifier generation.

use uuid::Uuid;

/// KiCad's namespace for path-derived UUIDs (RFC 4122 URL namespace).
const UUID_NAMESPACE_URL: Uuid = Uuid::from_u128(0x6ba7b811_9dad_11d1_80b4_00c04fd430c8);

macro_rules! arena_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) u32);

        impl $name {
            pub fn index(self) -> usize {
                self.0 as usize
            }

            pub(crate) fn from_index(index: usize) -> Self {
                Self(index as u32)
            }
        }
    };
}

arena_id!(
    /// Index of an element inside one [`crate::Schematic`].
    ElementId
);
arena_id!(
    /// Index of a loaded document inside a [`crate::Design`].
    DocId
);
arena_id!(
    /// Index of a sheet node inside a [`crate::Design`].
    SheetId
);

/// Map an author-supplied token to a stable UUID.
///
/// On the root sheet a token that already is a UUID is used verbatim.
/// Everywhere else the token is hashed together with the sheet path, so a
/// block instantiated twice yields two distinct, reproducible identifiers
/// even when its author wrote literal UUIDs.
pub fn stable_uuid(sheet_path: &str, token: &str) -> Uuid {
    if sheet_path == "/"
        && let Ok(uuid) = Uuid::parse_str(token)
    {
        return uuid;
    }
    Uuid::new_v5(&UUID_NAMESPACE_URL, format!("{sheet_path}#{token}").as_bytes())
}

/// Source of fresh identifiers for elements created during a run.
#[derive(Debug, Clone, Default)]
pub enum IdGenerator {
    #[default]
    Random,
    /// Reproducible sequence, used for golden files and tests
    Seeded { namespace: Uuid, counter: u64 },
}

impl IdGenerator {
    pub fn seeded(seed: u64) -> Self {
        Self::Seeded {
            namespace: Uuid::new_v5(&Uuid::NAMESPACE_OID, &seed.to_le_bytes()),
            counter: 0,
        }
    }

    pub fn next_uuid(&mut self) -> Uuid {
        match self {
            Self::Random => Uuid::new_v4(),
            Self::Seeded { namespace, counter } => {
                *counter += 1;
                Uuid::new_v5(namespace, &counter.to_le_bytes())
            }
        }
    }

    pub fn next_string(&mut self) -> String {
        self.next_uuid().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_uuid_is_path_scoped() {
        let a = stable_uuid("/power_1", "reg");
        let b = stable_uuid("/power_2", "reg");
        assert_ne!(a, b);
        assert_eq!(a, stable_uuid("/power_1", "reg"));
        assert_eq!(a.get_version_num(), 5);
    }

    #[test]
    fn uuid_tokens_pass_through_only_at_root() {
        let token = "5b9d2a4e-0000-4000-8000-000000000001";
        assert_eq!(stable_uuid("/", token).to_string(), token);

        let child = stable_uuid("/power_1", token);
        assert_ne!(child.to_string(), token);
        assert_ne!(child, stable_uuid("/power_2", token));
        assert_eq!(child, stable_uuid("/power_1", token));
    }

    #[test]
    fn seeded_generator_is_reproducible() {
        let mut a = IdGenerator::seeded(7);
        let mut b = IdGenerator::seeded(7);
        let first = a.next_uuid();
        assert_eq!(first, b.next_uuid());
        assert_ne!(first, a.next_uuid());
    }
}
