use shared::{
    domain::UserId,
    protocol::{MessageView, RawMessage},
};

use crate::roster::Roster;

/// Joins raw messages with the roster snapshot and the caller's identity.
///
/// Pure and total: input order is kept as-is, unknown or unset senders get the
/// "Deleted" label, and ownership is exact id equality with `self_id`. A
/// signed-out caller (`None`) owns nothing, not even messages without a sender.
pub fn compose(raw: &[RawMessage], roster: &Roster, self_id: Option<&UserId>) -> Vec<MessageView> {
    raw.iter()
        .map(|message| MessageView {
            id: message.id,
            sender_id: message.sender_id.clone(),
            body: message.body.clone(),
            created_at: message.created_at,
            sender_label: roster.label_for(message.sender_id.as_ref()).to_string(),
            is_own_message: matches!(
                (message.sender_id.as_ref(), self_id),
                (Some(sender), Some(me)) if sender == me
            ),
        })
        .collect()
}

#[cfg(test)]
#[path = "tests/composer_tests.rs"]
mod tests;
