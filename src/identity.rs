//! Per-unit participant identity.

use rand::Rng;
use uuid::Uuid;

use crate::config::SwarmConfig;

/// Exclusive upper bound of the number appended to the display name prefix.
const NAME_SUFFIX_RANGE: u32 = 10_000;

/// Who a unit claims to be. Created once per unit and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantIdentity {
    /// Participant identifier, stable for the lifetime of the unit.
    pub id: Uuid,
    /// Display name shown to other players.
    pub display_name: String,
    /// Avatar selector.
    pub avatar: u32,
    /// Locale tag.
    pub locale: String,
}

impl ParticipantIdentity {
    /// Generate a fresh identity from the swarm configuration.
    ///
    /// The display name is the configured prefix followed by a random number,
    /// since the remote refuses two players with the same name.
    pub fn generate(config: &SwarmConfig) -> Self {
        let suffix = rand::thread_rng().gen_range(0..NAME_SUFFIX_RANGE);
        Self {
            id: Uuid::new_v4(),
            display_name: format!("{}{suffix}", config.username_prefix),
            avatar: config.avatar,
            locale: config.locale.clone(),
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn identity_uses_config_values() {
        let config = SwarmConfig::default()
            .with_username_prefix("Doodle")
            .with_avatar(4)
            .with_locale("pt");
        let identity = ParticipantIdentity::generate(&config);

        assert_eq!(identity.avatar, 4);
        assert_eq!(identity.locale, "pt");
        let suffix = identity.display_name.strip_prefix("Doodle").unwrap();
        let number: u32 = suffix.parse().unwrap();
        assert!(number < NAME_SUFFIX_RANGE);
    }

    #[test]
    fn identities_are_independent() {
        let config = SwarmConfig::default();
        let a = ParticipantIdentity::generate(&config);
        let b = ParticipantIdentity::generate(&config);
        assert_ne!(a.id, b.id);
    }
}
