//! Trainee identity.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{ExternalUserId, Timestamp, UserId};

/// A trainee known to the engine.
///
/// Created on first contact from the messaging platform; never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub external_id: ExternalUserId,
    pub created_at: Timestamp,
}
