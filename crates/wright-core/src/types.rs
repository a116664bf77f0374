/// Identifier of a conversation session, chosen by the caller.
pub type SessionId = String;

/// Identifier of the target project a session works on.
pub type ProjectId = String;
