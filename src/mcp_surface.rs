//! The tool-call operation surface (spec §6, §9): a static table mapping
//! `operationName -> handler`, consumed by an external LLM transport
//! adapter over `POST /messages`/`GET /sse`. That adapter is an external
//! collaborator; this module only defines the neutral shape it talks to
//! — `{operation, args, principal}` in, `{content, isError}` out — and
//! the table of operations the core actually knows how to run.
//!
//! No reflection: every operation name here maps to one concrete async
//! handler, and argument validation happens before the handler runs.

use serde_json::Value;

use crate::types::Principal;

/// One exchange over the tool-call transport.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ToolCallRequest {
    pub operation: String,
    pub args: Value,
}

/// What the transport sends back to the model.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolCallResponse {
    pub content: Value,
    pub is_error: bool,
}

impl ToolCallResponse {
    pub fn ok(content: Value) -> Self {
        Self {
            content,
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: serde_json::json!({ "error": message.into() }),
            is_error: true,
        }
    }
}

/// Operation names the core exposes over the tool-call surface. These
/// mirror the REST mirror endpoints 1:1 (spec §6) so the same handler
/// logic backs both transports.
pub const OP_SEND_MESSAGE: &str = "send_message";
pub const OP_MAKE_CALL: &str = "make_call";
pub const OP_TRANSFER_CALL: &str = "transfer_call";
pub const OP_LIST_MESSAGES: &str = "list_messages";
pub const OP_PROVISION: &str = "provision";
pub const OP_DEPROVISION: &str = "deprovision";
pub const OP_GET_USAGE: &str = "get_usage";
pub const OP_GET_BILLING: &str = "get_billing";
pub const OP_GET_WAITING_MESSAGES: &str = "get_waiting_messages";
pub const OP_VERIFY_AUDIT: &str = "verify_audit";

/// The set of operation names the table knows, for argument-schema lookup
/// and for rejecting anything that isn't in the table before a handler
/// ever runs.
pub const KNOWN_OPERATIONS: &[&str] = &[
    OP_SEND_MESSAGE,
    OP_MAKE_CALL,
    OP_TRANSFER_CALL,
    OP_LIST_MESSAGES,
    OP_PROVISION,
    OP_DEPROVISION,
    OP_GET_USAGE,
    OP_GET_BILLING,
    OP_GET_WAITING_MESSAGES,
    OP_VERIFY_AUDIT,
];

pub fn is_known_operation(name: &str) -> bool {
    KNOWN_OPERATIONS.contains(&name)
}

/// A tool-call exchange carries a principal that was already resolved by
/// the transport adapter (bearer token verification happens once, at the
/// transport boundary, not per-operation).
pub struct ToolCallContext {
    pub principal: Principal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_operation() {
        assert!(!is_known_operation("delete_everything"));
        assert!(is_known_operation(OP_SEND_MESSAGE));
    }

    #[test]
    fn error_response_is_marked() {
        let response = ToolCallResponse::error("bad input");
        assert!(response.is_error);
    }
}
