//! Given one inbound message on side *S* and the peer *D*, forwards it
//! across with URIs and (optionally) the id rewritten, awaits a reply for
//! requests, and relays the outcome back to *S* (spec §4.4).

use std::sync::atomic::{AtomicI64, Ordering};

use serde_json::Value;
use tracing::warn;

use crate::config::IdRewrite;
use crate::connection::{Connection, Inbound};
use crate::error::DispatchError;
use crate::message::{MessageId, RpcError};
use crate::uri::rewrite_uris;

/// Computes the id a forwarded request should carry on `dest`, per the
/// session's `jsonrpc2IDRewrite` policy (spec §6). `counter` is the
/// session-scoped monotonic counter (spec §9: session-scoped, not
/// process-global).
pub fn outbound_id(inbound_id: &MessageId, policy: IdRewrite, counter: &AtomicI64) -> MessageId {
    match policy {
        IdRewrite::None => inbound_id.clone(),
        IdRewrite::String => MessageId::String(counter.fetch_add(1, Ordering::SeqCst).to_string()),
        IdRewrite::Number => MessageId::Number(counter.fetch_add(1, Ordering::SeqCst)),
    }
}

/// Forwards an already-translated notification to `dest`. Step 2 of spec
/// §4.4, split out so callers that need to inject side effects (the
/// synthetic `didOpen` of spec §4.5) between translation and forwarding
/// can do so without duplicating the translation step.
pub fn forward_notification(
    dest: &Connection,
    method: &str,
    params: Value,
) -> Result<(), DispatchError> {
    dest.notify(method, params)
}

/// Forwards an already-translated request to `dest`, awaits its reply,
/// translates the result, and replies to `source` under the *original*
/// inbound id (steps 3-6 of spec §4.4).
///
/// Returns `Err` only for failures that should end the session (the peer
/// connection going away mid-call); a JSON-RPC error *response* from the
/// peer is not an error here — it's relayed verbatim to `source` and this
/// returns `Ok(())`, matching spec §7's "surface peer errors verbatim"
/// policy.
pub async fn forward_request(
    source: &Connection,
    dest: &Connection,
    id: MessageId,
    method: &str,
    params: Value,
    in_translate: &dyn Fn(&str) -> String,
    id_policy: IdRewrite,
    id_counter: &AtomicI64,
) -> Result<(), DispatchError> {
    let dest_id = outbound_id(&id, id_policy, id_counter);
    let outcome = dest.call_for_roundtrip(dest_id, method, params).await;

    match outcome {
        Ok(Ok(mut result)) => {
            rewrite_uris(&mut result, in_translate);
            source.reply(id, result)?;
            Ok(())
        }
        Ok(Err(rpc_error)) => {
            warn!(
                method = %method,
                code = rpc_error.code,
                message = %rpc_error.message,
                "peer returned a JSON-RPC error"
            );
            source.reply_error(id, rpc_error)?;
            Ok(())
        }
        Err(DispatchError::ChannelClosed) => {
            let _ = source.reply_error(
                id,
                RpcError {
                    code: -32000,
                    message: "downstream connection closed".into(),
                    data: None,
                },
            );
            Err(DispatchError::ChannelClosed)
        }
        Err(err) => {
            let _ = source.reply_error(
                id,
                RpcError {
                    code: -32000,
                    message: err.to_string(),
                    data: None,
                },
            );
            Err(err)
        }
    }
}

/// Translates then forwards one inbound request/notification from
/// `source` to `dest` — the full spec §4.4 round trip, for directions
/// that don't need to intercept the translated URIs (no synthetic
/// `didOpen`). The client→server direction instead calls
/// [`uri::rewrite_uris`](crate::uri::rewrite_uris) and
/// [`forward_request`]/[`forward_notification`] directly so it can inject
/// synthetic `didOpen` notifications between the two steps.
pub async fn round_trip(
    inbound: Inbound,
    source: &Connection,
    dest: &Connection,
    out_translate: &dyn Fn(&str) -> String,
    in_translate: &dyn Fn(&str) -> String,
    id_policy: IdRewrite,
    id_counter: &AtomicI64,
) -> Result<(), DispatchError> {
    match inbound {
        Inbound::Notification { method, params } => {
            let mut params = params;
            rewrite_uris(&mut params, out_translate);
            forward_notification(dest, &method, params)
        }
        Inbound::Request { id, method, params } => {
            let mut out_params = params;
            rewrite_uris(&mut out_params, out_translate);
            forward_request(
                source,
                dest,
                id,
                &method,
                out_params,
                in_translate,
                id_policy,
                id_counter,
            )
            .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_policy_preserves_inbound_id() {
        let counter = AtomicI64::new(0);
        let id = MessageId::Number(7);
        assert_eq!(outbound_id(&id, IdRewrite::None, &counter), id);
    }

    #[test]
    fn string_policy_uses_counter_as_string() {
        let counter = AtomicI64::new(0);
        let id = MessageId::Number(7);
        assert_eq!(
            outbound_id(&id, IdRewrite::String, &counter),
            MessageId::String("0".into())
        );
        assert_eq!(
            outbound_id(&id, IdRewrite::String, &counter),
            MessageId::String("1".into())
        );
    }

    #[test]
    fn number_policy_produces_distinct_ids_for_concurrent_requests() {
        let counter = AtomicI64::new(0);
        let a = outbound_id(&MessageId::Number(1), IdRewrite::Number, &counter);
        let b = outbound_id(&MessageId::Number(2), IdRewrite::Number, &counter);
        assert_ne!(a, b);
    }
}
