//! Owner/provider roles, the pause switch, and per-action cooldowns.

use std::collections::{BTreeSet, HashMap};

use crate::{
    errors::{NegotiationError, NegotiationResult},
    types::{ActionKind, Identity, Timestamp},
};

pub struct AccessControl {
    owner: Identity,
    providers: BTreeSet<Identity>,
    paused: bool,
    cooldown_seconds: u64,
    last_submission: HashMap<Identity, Timestamp>,
    last_decryption_request: HashMap<Identity, Timestamp>,
}

impl AccessControl {
    pub fn new(owner: Identity, cooldown_seconds: u64) -> Self {
        Self {
            owner,
            providers: BTreeSet::new(),
            paused: false,
            cooldown_seconds,
            last_submission: HashMap::new(),
            last_decryption_request: HashMap::new(),
        }
    }

    pub fn owner(&self) -> &Identity {
        &self.owner
    }

    pub fn is_provider(&self, identity: &Identity) -> bool {
        self.providers.contains(identity)
    }

    pub fn providers(&self) -> impl Iterator<Item = &Identity> {
        self.providers.iter()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn cooldown_seconds(&self) -> u64 {
        self.cooldown_seconds
    }

    pub fn last_action(&self, identity: &Identity, action: ActionKind) -> Option<Timestamp> {
        self.registry(action).get(identity).copied()
    }

    pub fn ensure_owner(&self, caller: &Identity) -> NegotiationResult<()> {
        if caller != &self.owner {
            return Err(NegotiationError::NotOwner {
                caller: caller.clone(),
            });
        }
        Ok(())
    }

    pub fn ensure_provider(&self, caller: &Identity) -> NegotiationResult<()> {
        if !self.is_provider(caller) {
            return Err(NegotiationError::NotProvider {
                caller: caller.clone(),
            });
        }
        Ok(())
    }

    pub fn ensure_not_paused(&self) -> NegotiationResult<()> {
        if self.paused {
            return Err(NegotiationError::PausedContract);
        }
        Ok(())
    }

    /// The first action of a kind is never limited.
    pub fn ensure_cooldown(
        &self,
        caller: &Identity,
        action: ActionKind,
        now: Timestamp,
    ) -> NegotiationResult<()> {
        if let Some(last) = self.last_action(caller, action) {
            let retry_at = last.saturating_add(self.cooldown_seconds);
            if now < retry_at {
                return Err(NegotiationError::CooldownActive {
                    caller: caller.clone(),
                    action,
                    retry_at,
                });
            }
        }
        Ok(())
    }

    pub fn record_action(&mut self, caller: &Identity, action: ActionKind, now: Timestamp) {
        let registry = match action {
            ActionKind::Submission => &mut self.last_submission,
            ActionKind::DecryptionRequest => &mut self.last_decryption_request,
        };
        registry.insert(caller.clone(), now);
    }

    /// Returns the previous owner.
    pub fn transfer_ownership(&mut self, new_owner: Identity) -> Identity {
        std::mem::replace(&mut self.owner, new_owner)
    }

    /// Returns `true` when membership changed.
    pub fn add_provider(&mut self, provider: Identity) -> bool {
        self.providers.insert(provider)
    }

    /// Returns `true` when membership changed.
    pub fn remove_provider(&mut self, provider: &Identity) -> bool {
        self.providers.remove(provider)
    }

    pub fn pause(&mut self) -> NegotiationResult<()> {
        if self.paused {
            return Err(NegotiationError::AlreadyPaused);
        }
        self.paused = true;
        Ok(())
    }

    pub fn unpause(&mut self) -> NegotiationResult<()> {
        if !self.paused {
            return Err(NegotiationError::NotPaused);
        }
        self.paused = false;
        Ok(())
    }

    /// Returns the previous value.
    pub fn set_cooldown_seconds(&mut self, seconds: u64) -> u64 {
        std::mem::replace(&mut self.cooldown_seconds, seconds)
    }

    fn registry(&self, action: ActionKind) -> &HashMap<Identity, Timestamp> {
        match action {
            ActionKind::Submission => &self.last_submission,
            ActionKind::DecryptionRequest => &self.last_decryption_request,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn access() -> AccessControl {
        AccessControl::new(Identity::new("owner"), 30)
    }

    #[test]
    fn pause_and_unpause_are_symmetric() {
        let mut access = access();
        assert_eq!(access.unpause().unwrap_err(), NegotiationError::NotPaused);
        access.pause().unwrap();
        assert_eq!(access.pause().unwrap_err(), NegotiationError::AlreadyPaused);
        assert_eq!(
            access.ensure_not_paused().unwrap_err(),
            NegotiationError::PausedContract
        );
        access.unpause().unwrap();
        assert!(access.ensure_not_paused().is_ok());
    }

    #[test]
    fn cooldowns_are_tracked_per_action_kind() {
        let mut access = access();
        let who = Identity::new("p1");
        assert!(access
            .ensure_cooldown(&who, ActionKind::Submission, 0)
            .is_ok());
        access.record_action(&who, ActionKind::Submission, 100);
        let err = access
            .ensure_cooldown(&who, ActionKind::Submission, 129)
            .unwrap_err();
        assert!(matches!(
            err,
            NegotiationError::CooldownActive { retry_at: 130, .. }
        ));
        assert!(access
            .ensure_cooldown(&who, ActionKind::Submission, 130)
            .is_ok());
        assert!(access
            .ensure_cooldown(&who, ActionKind::DecryptionRequest, 101)
            .is_ok());
    }

    #[test]
    fn provider_membership_is_idempotent() {
        let mut access = access();
        let who = Identity::new("p1");
        assert!(access.add_provider(who.clone()));
        assert!(!access.add_provider(who.clone()));
        assert!(access.remove_provider(&who));
        assert!(!access.remove_provider(&who));
        assert!(access.ensure_provider(&who).is_err());
    }
}
