//! Per-failover-set client state: the token ratchet, the locally cached
//! primary, and the local primary-file mirror.
//!
//! Grounded on `original_source/go/client.go`'s `RedisSystem`.

use lib_common::primary_file;
use lib_common::redis_probe::Endpoint;
use lib_common::token::Token;
use tracing::warn;

pub struct RedisSystem {
    pub name: String,
    pub token: Token,
    pub current_master: Option<Endpoint>,
    pub primary_file_path: String,
}

impl RedisSystem {
    pub fn new(name: impl Into<String>, primary_file_path: impl Into<String>) -> Self {
        let name = name.into();
        let primary_file_path = primary_file_path.into();
        let masters = primary_file::masters_from_primary_file(&primary_file_path);
        let current_master = masters
            .get(&name)
            .or_else(|| masters.get(primary_file::RESERVED_SYSTEM_KEY))
            .and_then(|s| s.parse().ok());
        RedisSystem {
            name,
            token: Token::zero(),
            current_master,
            primary_file_path,
        }
    }

    /// Accepts `incoming` iff it is not older than the stored token, then
    /// ratchets the stored token forward — so a stale/replayed token is
    /// always rejected and a newer one is always adopted, regardless of
    /// the comparison's outcome.
    pub fn redeem_token(&mut self, incoming: &Token) -> bool {
        let fresh = self.token.accepts(incoming);
        if incoming.value() > self.token.value() {
            self.token = incoming.clone();
        }
        fresh
    }

    /// Drops the locally cached primary when told to invalidate, provided
    /// the token is fresh and either we hold no primary at all or the
    /// primary we think we have no longer probes as a master — accepting
    /// every fresh invalidate unconditionally would drop a handle on a
    /// primary we can still verify is correct.
    pub async fn invalidate(&mut self, token: &Token) -> bool {
        if !self.redeem_token(token) {
            return false;
        }
        let should_drop = match &self.current_master {
            None => true,
            Some(master) => !lib_common::redis_probe::probe(master).await.is_master(),
        };
        if !should_drop {
            return false;
        }
        self.current_master = None;
        self.persist();
        true
    }

    /// Adopts `server` as the new primary, provided the token is fresh.
    /// A stale token is dropped without acting on it (DESIGN.md decision
    /// 3: the original logs but still applies a stale reconfigure; this
    /// build rejects it, matching the testable scenario that a stale token
    /// must never be honoured).
    pub fn reconfigure(&mut self, token: &Token, server: &str) -> Option<Endpoint> {
        if !self.redeem_token(token) {
            warn!(system = %self.name, "dropping reconfigure with a stale token");
            return None;
        }
        let endpoint: Endpoint = server.parse().ok()?;
        self.current_master = Some(endpoint.clone());
        self.persist();
        Some(endpoint)
    }

    fn persist(&self) {
        let mut masters = std::collections::BTreeMap::new();
        if let Some(master) = &self.current_master {
            masters.insert(self.name.clone(), master.to_string());
        }
        let content = primary_file::marshal(&masters);
        if let Err(e) = primary_file::write_primary_file(&self.primary_file_path, &content) {
            warn!(system = %self.name, error = %e, "failed to persist local primary file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn system() -> RedisSystem {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("redis-master");
        // leak the tempdir so the path stays valid for the test's lifetime
        let path = path.to_str().unwrap().to_string();
        std::mem::forget(dir);
        RedisSystem::new("system", path)
    }

    #[tokio::test]
    async fn stale_token_is_rejected_and_does_not_invalidate() {
        let mut sys = system();
        sys.token = Token::from_value(10);
        sys.current_master = Some(Endpoint::new("a", 1));
        assert!(!sys.invalidate(&Token::from_value(9)).await);
        assert!(sys.current_master.is_some());
    }

    #[tokio::test]
    async fn fresh_token_invalidates_unreachable_primary_and_ratchets_forward() {
        let mut sys = system();
        sys.token = Token::from_value(10);
        sys.current_master = Some(Endpoint::new("a", 1));
        assert!(sys.invalidate(&Token::from_value(11)).await);
        assert!(sys.current_master.is_none());
        assert_eq!(sys.token, Token::from_value(11));
    }

    #[tokio::test]
    async fn fresh_token_with_no_current_primary_still_invalidates() {
        let mut sys = system();
        sys.token = Token::from_value(10);
        sys.current_master = None;
        assert!(sys.invalidate(&Token::from_value(11)).await);
        assert!(sys.current_master.is_none());
    }

    #[test]
    fn reconfigure_with_stale_token_is_dropped() {
        let mut sys = system();
        sys.token = Token::from_value(10);
        let result = sys.reconfigure(&Token::from_value(5), "b:1");
        assert!(result.is_none());
        assert!(sys.current_master.is_none());
    }

    #[test]
    fn reconfigure_with_fresh_token_adopts_new_primary() {
        let mut sys = system();
        let result = sys.reconfigure(&Token::from_value(1), "b:1");
        assert_eq!(result, Some(Endpoint::new("b", 1)));
        assert_eq!(sys.current_master, Some(Endpoint::new("b", 1)));
    }
}
