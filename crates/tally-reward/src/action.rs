//! Eligibility actions.
//!
//! Programs store their action as an [`AnyAction`]: a type tag plus an
//! encoded body. The [`ActionRegistry`] maps each tag to a decoder, so new
//! action kinds plug in without touching the tracker or the engine.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tally_types::{AnyAction, EligibilityCriteria};

use crate::activity::ParticipantActivity;
use crate::{RewardError, Result};

pub const ACTION_TYPE_DELEGATE: &str = "ActionDelegate";
pub const ACTION_TYPE_TRANSFER_DELEGATIONS: &str = "ActionTransferDelegations";

/// Capability contract of an eligibility action.
pub trait RewardAction: fmt::Debug + Send + Sync {
    fn action_type(&self) -> &'static str;

    fn validate_basic(&self) -> Result<()>;

    /// Whether the participant qualified during the epoch.
    ///
    /// # Errors
    ///
    /// - [`RewardError::Ineligible`] if no observed action qualifies
    fn is_eligible(&self, activity: &ParticipantActivity) -> Result<()>;

    /// Shares earned by an eligible participant.
    fn shares(&self, activity: &ParticipantActivity) -> u64;
}

/// Inclusive volume bounds shared by the built-in actions.
fn check_bounds(action_type: &str, minimum: u64, maximum: u64) -> Result<()> {
    if minimum > maximum {
        return Err(RewardError::InvalidAction {
            action_type: action_type.to_string(),
            reason: format!("minimum ({minimum}) exceeds maximum ({maximum})"),
        });
    }
    Ok(())
}

fn qualifying(volumes: &[u64], minimum: u64, maximum: u64) -> u64 {
    volumes
        .iter()
        .filter(|v| (minimum..=maximum).contains(*v))
        .count() as u64
}

fn require_qualifying(
    activity: &ParticipantActivity,
    action_type: &str,
    minimum: u64,
    maximum: u64,
) -> Result<()> {
    if qualifying(activity.volumes(action_type), minimum, maximum) == 0 {
        return Err(RewardError::Ineligible {
            address: activity.address.clone(),
            reason: format!("no {action_type} with volume in [{minimum}, {maximum}]"),
        });
    }
    Ok(())
}

/// Eligible for delegating a stake within `[minimum, maximum]`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionDelegate {
    pub minimum: u64,
    pub maximum: u64,
}

impl ActionDelegate {
    pub fn new(minimum: u64, maximum: u64) -> Self {
        Self { minimum, maximum }
    }
}

impl RewardAction for ActionDelegate {
    fn action_type(&self) -> &'static str {
        ACTION_TYPE_DELEGATE
    }

    fn validate_basic(&self) -> Result<()> {
        check_bounds(ACTION_TYPE_DELEGATE, self.minimum, self.maximum)
    }

    fn is_eligible(&self, activity: &ParticipantActivity) -> Result<()> {
        require_qualifying(activity, ACTION_TYPE_DELEGATE, self.minimum, self.maximum)
    }

    fn shares(&self, activity: &ParticipantActivity) -> u64 {
        qualifying(activity.volumes(ACTION_TYPE_DELEGATE), self.minimum, self.maximum)
    }
}

/// Eligible for transferring delegations with volume within `[minimum, maximum]`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionTransferDelegations {
    pub minimum: u64,
    pub maximum: u64,
}

impl ActionTransferDelegations {
    pub fn new(minimum: u64, maximum: u64) -> Self {
        Self { minimum, maximum }
    }
}

impl RewardAction for ActionTransferDelegations {
    fn action_type(&self) -> &'static str {
        ACTION_TYPE_TRANSFER_DELEGATIONS
    }

    fn validate_basic(&self) -> Result<()> {
        check_bounds(ACTION_TYPE_TRANSFER_DELEGATIONS, self.minimum, self.maximum)
    }

    fn is_eligible(&self, activity: &ParticipantActivity) -> Result<()> {
        require_qualifying(
            activity,
            ACTION_TYPE_TRANSFER_DELEGATIONS,
            self.minimum,
            self.maximum,
        )
    }

    fn shares(&self, activity: &ParticipantActivity) -> u64 {
        qualifying(
            activity.volumes(ACTION_TYPE_TRANSFER_DELEGATIONS),
            self.minimum,
            self.maximum,
        )
    }
}

/// Encode a concrete action into its stored form.
pub fn pack<A: RewardAction + Serialize>(action: &A) -> Result<AnyAction> {
    let value = serde_json::to_value(action).map_err(|e| RewardError::InvalidAction {
        action_type: action.action_type().to_string(),
        reason: e.to_string(),
    })?;
    Ok(AnyAction {
        action_type: action.action_type().to_string(),
        value,
    })
}

type Decoder = fn(&str, &serde_json::Value) -> Result<Box<dyn RewardAction>>;

fn decode<A: RewardAction + DeserializeOwned + 'static>(
    action_type: &str,
    value: &serde_json::Value,
) -> Result<Box<dyn RewardAction>> {
    let action: A = serde_json::from_value(value.clone()).map_err(|e| RewardError::InvalidAction {
        action_type: action_type.to_string(),
        reason: e.to_string(),
    })?;
    Ok(Box::new(action))
}

/// Decoders for every supported action type.
#[derive(Clone)]
pub struct ActionRegistry {
    decoders: BTreeMap<String, Decoder>,
}

impl ActionRegistry {
    /// A registry with no action types.
    pub fn empty() -> Self {
        Self {
            decoders: BTreeMap::new(),
        }
    }

    /// Register a decoder for `action_type`.
    ///
    /// # Errors
    ///
    /// - [`RewardError::Config`] if the type is already registered
    pub fn register<A>(&mut self, action_type: &str) -> Result<()>
    where
        A: RewardAction + DeserializeOwned + 'static,
    {
        if self.decoders.contains_key(action_type) {
            return Err(RewardError::Config(format!(
                "action type {action_type} registered twice"
            )));
        }
        self.decoders.insert(action_type.to_string(), decode::<A>);
        Ok(())
    }

    pub fn contains(&self, action_type: &str) -> bool {
        self.decoders.contains_key(action_type)
    }

    /// Decode and validate a stored action.
    ///
    /// # Errors
    ///
    /// - [`RewardError::UnknownAction`] if no decoder is registered
    /// - [`RewardError::InvalidAction`] if the body does not decode,
    ///   decodes to another type, or fails validation
    pub fn resolve(&self, any: &AnyAction) -> Result<Box<dyn RewardAction>> {
        let decoder = self
            .decoders
            .get(&any.action_type)
            .ok_or_else(|| RewardError::UnknownAction(any.action_type.clone()))?;
        let action = decoder(&any.action_type, &any.value)?;
        if action.action_type() != any.action_type {
            return Err(RewardError::InvalidAction {
                action_type: any.action_type.clone(),
                reason: format!("decoded as {}", action.action_type()),
            });
        }
        action.validate_basic()?;
        Ok(action)
    }

    /// Resolve the action of an eligibility criteria.
    pub fn resolve_criteria(&self, criteria: &EligibilityCriteria) -> Result<Box<dyn RewardAction>> {
        criteria.validate_basic()?;
        match &criteria.action {
            Some(action) => self.resolve(action),
            None => Err(RewardError::InvalidProgram(
                "eligibility criteria must have an action".to_string(),
            )),
        }
    }
}

impl Default for ActionRegistry {
    /// The built-in delegate and transfer-delegations actions.
    fn default() -> Self {
        let mut decoders: BTreeMap<String, Decoder> = BTreeMap::new();
        decoders.insert(ACTION_TYPE_DELEGATE.to_string(), decode::<ActionDelegate>);
        decoders.insert(
            ACTION_TYPE_TRANSFER_DELEGATIONS.to_string(),
            decode::<ActionTransferDelegations>,
        );
        Self { decoders }
    }
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.decoders.keys()).finish()
    }
}
