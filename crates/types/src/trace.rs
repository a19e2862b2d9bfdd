use alloy_primitives::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};

/// The recognized non-retryable trace failure (spec §4.5 step 4, §7 kind 3,
/// §8 scenario 6). This is the *only* error class that becomes a null trace
/// entry instead of propagating as a fetch failure.
pub const PRECOMPILE_CLASS_TRACE_ERROR: &str = "incorrect number of top-level calls";

/// True if `message` is the one recognized precompile-class trace error.
pub fn is_precompile_class_error(message: &str) -> bool {
    message.contains(PRECOMPILE_CLASS_TRACE_ERROR)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallType {
    #[serde(rename = "CALL")]
    Call,
    #[serde(rename = "STATICCALL")]
    StaticCall,
    #[serde(rename = "DELEGATECALL")]
    DelegateCall,
    #[serde(rename = "CREATE")]
    Create,
    #[serde(rename = "CREATE2")]
    Create2,
    #[serde(rename = "SELFDESTRUCT")]
    SelfDestruct,
}

/// One node of the recursive call tree produced by `debug_traceTransaction`
/// / `debug_traceBlockByNumber` with the `callTracer`. Spec §3.
///
/// The tree is naturally unbounded in depth (spec §9 design note); callers
/// that need to flatten it for export should do so iteratively rather than
/// recursively to avoid blowing the stack on pathological traces, and
/// `CallFrame::depth` below bounds parsing depth for the same reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallFrame {
    #[serde(rename = "type")]
    pub call_type: CallType,
    pub from: Address,
    pub to: Address,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<U256>,
    pub gas: U256,
    #[serde(rename = "gasUsed")]
    pub gas_used: U256,
    pub input: Bytes,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Bytes>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "revertReason", skip_serializing_if = "Option::is_none")]
    pub revert_reason: Option<String>,
    #[serde(default, rename = "calls")]
    pub calls: Vec<CallFrame>,
}

/// Maximum tree depth accepted when parsing an inbound trace response. A
/// defensive bound against pathological/adversarial trace payloads (spec §9
/// design note: "should bound maximum depth at parse time").
pub const MAX_TRACE_DEPTH: usize = 1024;

#[derive(Debug, thiserror::Error)]
#[error("trace tree exceeds maximum depth of {MAX_TRACE_DEPTH}")]
pub struct TraceTooDeep;

impl CallFrame {
    /// Validates that this call tree does not exceed [`MAX_TRACE_DEPTH`].
    pub fn check_depth(&self) -> Result<(), TraceTooDeep> {
        fn walk(frame: &CallFrame, depth: usize) -> Result<(), TraceTooDeep> {
            if depth > MAX_TRACE_DEPTH {
                return Err(TraceTooDeep);
            }
            for child in &frame.calls {
                walk(child, depth + 1)?;
            }
            Ok(())
        }
        walk(self, 1)
    }

    /// Flattens the call tree into a depth-first iterative sequence,
    /// avoiding recursion so pathologically deep traces can't blow the
    /// stack when exporting (spec §9 design note).
    pub fn flatten(&self) -> Vec<&CallFrame> {
        let mut out = Vec::new();
        let mut stack: Vec<&CallFrame> = vec![self];
        while let Some(frame) = stack.pop() {
            out.push(frame);
            // push in reverse so children are visited in original order
            for child in frame.calls.iter().rev() {
                stack.push(child);
            }
        }
        out
    }
}

/// `traces[]` entry: either a recursive call tree, or `null` when the trace
/// failed with the one recognized precompile-class error (spec §3, §4.5).
pub type TraceResult = Option<CallFrame>;

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(gas_used: u64) -> CallFrame {
        CallFrame {
            call_type: CallType::Call,
            from: Address::ZERO,
            to: Address::ZERO,
            value: None,
            gas: U256::from(100_000u64),
            gas_used: U256::from(gas_used),
            input: Bytes::new(),
            output: None,
            error: None,
            revert_reason: None,
            calls: Vec::new(),
        }
    }

    #[test]
    fn recognizes_precompile_class_error_substring() {
        assert!(is_precompile_class_error(
            "execution reverted: incorrect number of top-level calls"
        ));
        assert!(!is_precompile_class_error("execution reverted: out of gas"));
    }

    #[test]
    fn flatten_visits_every_node_depth_first_in_order() {
        let mut root = leaf(1);
        root.calls = vec![leaf(2), leaf(3)];
        let flat = root.flatten();
        assert_eq!(flat.len(), 3);
        assert_eq!(flat[0].gas_used, U256::from(1u64));
        assert_eq!(flat[1].gas_used, U256::from(2u64));
        assert_eq!(flat[2].gas_used, U256::from(3u64));
    }

    #[test]
    fn check_depth_rejects_trees_deeper_than_the_bound() {
        let mut frame = leaf(0);
        for _ in 0..(MAX_TRACE_DEPTH + 10) {
            frame = CallFrame {
                calls: vec![frame],
                ..leaf(0)
            };
        }
        assert!(frame.check_depth().is_err());
    }

    #[test]
    fn check_depth_accepts_shallow_trees() {
        let mut frame = leaf(0);
        frame.calls = vec![leaf(1), leaf(2)];
        assert!(frame.check_depth().is_ok());
    }
}
