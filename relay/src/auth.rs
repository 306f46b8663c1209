use std::fmt;
use std::sync::Arc;

/// The static key shared between devices, the dashboard and the relay.
#[derive(Clone)]
pub struct SharedSecret(Arc<str>);

impl SharedSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(Arc::from(secret.into()))
    }

    /// Plain equality against the claimed key. An absent key never matches.
    pub fn verify(&self, claimed: Option<&str>) -> bool {
        claimed.is_some_and(|key| key == &*self.0)
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedSecret(***)")
    }
}
