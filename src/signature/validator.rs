//! Signature admission policy.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, warn};

use super::{SignatureError, SignatureState};
use crate::config::ManagerConfig;
use crate::plugin::PluginRecord;

/// Injected predicate that may admit an unsigned plugin.
pub type UnsignedPluginCondition = Arc<dyn Fn(&PluginRecord) -> bool + Send + Sync>;

/// Applies signature policy to evaluated records, producing a load decision
/// per plugin.
pub struct SignatureValidator<'a> {
    cfg: &'a ManagerConfig,
    allow_unsigned_condition: Option<&'a UnsignedPluginCondition>,
}

impl<'a> SignatureValidator<'a> {
    pub fn new(
        cfg: &'a ManagerConfig,
        allow_unsigned_condition: Option<&'a UnsignedPluginCondition>,
    ) -> Self {
        Self {
            cfg,
            allow_unsigned_condition,
        }
    }

    /// Derive the effective signature state of a record.
    ///
    /// A nested plugin that is neither core nor internally signed inherits
    /// the state of its nearest loaded ancestor. The observed state on the
    /// record is left intact; inheritance is a policy rule, not a mutation.
    pub fn effective_state(
        record: &PluginRecord,
        records: &BTreeMap<PathBuf, PluginRecord>,
    ) -> SignatureState {
        let observed = record.signature.state;
        if record.is_core()
            || observed == SignatureState::Valid
            || observed == SignatureState::Internal
        {
            return observed;
        }
        for ancestor in record.plugin_dir.ancestors().skip(1) {
            if let Some(parent) = records.get(ancestor) {
                return Self::effective_state(parent, records);
            }
        }
        observed
    }

    /// Apply the policy matrix to a record and its effective state.
    pub fn validate(
        &self,
        record: &PluginRecord,
        effective: SignatureState,
    ) -> Result<(), SignatureError> {
        let id = record.id();
        let observed = record.signature.state;

        if observed == SignatureState::Valid {
            debug!("Plugin has valid signature: {}", id);
            return Ok(());
        }

        let state = if record.parent.is_some()
            && !record.is_core()
            && observed != SignatureState::Internal
        {
            debug!(
                "Plugin {} inherits signature state {} from its parent",
                id, effective
            );
            if effective == SignatureState::Valid {
                return Ok(());
            }
            effective
        } else {
            observed
        };

        if !self.cfg.signature_required(record.class) {
            return Ok(());
        }

        match state {
            SignatureState::Unsigned => {
                if self.allow_unsigned(record) {
                    warn!(
                        "Running unsigned plugin {} from {:?}",
                        id, record.plugin_dir
                    );
                    Ok(())
                } else {
                    Err(SignatureError::Missing(id.to_string()))
                }
            }
            SignatureState::Invalid => Err(SignatureError::Invalid(id.to_string())),
            SignatureState::Modified => Err(SignatureError::Modified(id.to_string())),
            other => {
                warn!(
                    "Plugin {} has unrecognized signature state {}",
                    id, other
                );
                Err(SignatureError::Invalid(id.to_string()))
            }
        }
    }

    fn allow_unsigned(&self, record: &PluginRecord) -> bool {
        if let Some(condition) = self.allow_unsigned_condition {
            if condition(record) {
                return true;
            }
        }
        self.cfg.dev_mode || self.cfg.allow_unsigned.iter().any(|id| id == record.id())
    }
}
