//! Built-in externs
//!
//! Signatures follow the compiler's mangling: declaring type, `__`, member,
//! `__`, parameter types joined by `_`, `__`, return type. Outputs occupy the
//! last argument slot.

use super::externs::{ExternCall, ExternError, ExternRegistry};
use crate::context::NetworkEventTarget;
use tracing::info;
use udon_bytecode::Value;

/// `int + int`
pub const INT32_ADDITION: &str = "SystemInt32.__op_Addition__SystemInt32_SystemInt32__SystemInt32";
/// `int - int`
pub const INT32_SUBTRACTION: &str =
    "SystemInt32.__op_Subtraction__SystemInt32_SystemInt32__SystemInt32";
/// `int < int`
pub const INT32_LESS_THAN: &str = "SystemInt32.__op_LessThan__SystemInt32_SystemInt32__SystemBoolean";
/// `int == int`
pub const INT32_EQUALITY: &str = "SystemInt32.__op_Equality__SystemInt32_SystemInt32__SystemBoolean";
/// `!bool`
pub const BOOLEAN_UNARY_NEGATION: &str =
    "SystemBoolean.__op_UnaryNegation__SystemBoolean__SystemBoolean";
/// `float + float`
pub const SINGLE_ADDITION: &str =
    "SystemSingle.__op_Addition__SystemSingle_SystemSingle__SystemSingle";
/// `string + string`
pub const STRING_CONCAT: &str = "SystemString.__Concat__SystemString_SystemString__SystemString";
/// `Debug.Log(object)`
pub const DEBUG_LOG: &str = "UnityEngineDebug.__Log__SystemObject__SystemVoid";
/// `behaviour.SendCustomEvent(name)`
pub const SEND_CUSTOM_EVENT: &str =
    "VRCUdonCommonInterfacesIUdonEventReceiver.__SendCustomEvent__SystemString__SystemVoid";
/// `behaviour.SetProgramVariable(name, value)`
pub const SET_PROGRAM_VARIABLE: &str = "VRCUdonCommonInterfacesIUdonEventReceiver.__SetProgramVariable__SystemString_SystemObject__SystemVoid";
/// `behaviour.GetProgramVariable(name)`
pub const GET_PROGRAM_VARIABLE: &str =
    "VRCUdonCommonInterfacesIUdonEventReceiver.__GetProgramVariable__SystemString__SystemObject";
/// `behaviour.SendCustomNetworkEvent(target, name)`
pub const SEND_CUSTOM_NETWORK_EVENT: &str = "VRCUdonCommonInterfacesIUdonEventReceiver.__SendCustomNetworkEvent__VRCUdonCommonInterfacesNetworkEventTarget_SystemString__SystemVoid";

/// Target of [`DEBUG_LOG`] output
pub const DEBUG_LOG_TARGET: &str = "udon::debug_log";

/// Register every built-in extern
pub fn register_builtins(registry: &mut ExternRegistry) {
    registry.register(INT32_ADDITION, 3, |call| {
        let sum = call.get_i32(0)?.wrapping_add(call.get_i32(1)?);
        call.set(2, Value::Int32(sum))
    });
    registry.register(INT32_SUBTRACTION, 3, |call| {
        let difference = call.get_i32(0)?.wrapping_sub(call.get_i32(1)?);
        call.set(2, Value::Int32(difference))
    });
    registry.register(INT32_LESS_THAN, 3, |call| {
        let less = call.get_i32(0)? < call.get_i32(1)?;
        call.set(2, Value::Boolean(less))
    });
    registry.register(INT32_EQUALITY, 3, |call| {
        let equal = call.get_i32(0)? == call.get_i32(1)?;
        call.set(2, Value::Boolean(equal))
    });
    registry.register(BOOLEAN_UNARY_NEGATION, 2, |call| {
        let negated = !call.get_bool(0)?;
        call.set(1, Value::Boolean(negated))
    });
    registry.register(SINGLE_ADDITION, 3, |call| {
        let sum = call.get_f32(0)? + call.get_f32(1)?;
        call.set(2, Value::Single(sum))
    });
    registry.register(STRING_CONCAT, 3, |call| {
        let mut joined = call.get_string(0)?;
        joined.push_str(&call.get_string(1)?);
        call.set(2, Value::String(joined))
    });
    registry.register(DEBUG_LOG, 1, debug_log);
    registry.register(SEND_CUSTOM_EVENT, 2, |call| {
        let target = call.behaviour(0)?;
        let event = call.get_string(1)?;
        target.send_custom_event(&event);
        Ok(())
    });
    registry.register(SET_PROGRAM_VARIABLE, 3, |call| {
        let target = call.behaviour(0)?;
        let name = call.get_string(1)?;
        target.set_variable(&name, call.get(2)?);
        Ok(())
    });
    registry.register(GET_PROGRAM_VARIABLE, 3, |call| {
        let target = call.behaviour(0)?;
        let name = call.get_string(1)?;
        call.set(2, target.get_variable(&name).unwrap_or(Value::Null))
    });
    registry.register(SEND_CUSTOM_NETWORK_EVENT, 3, |call| {
        let target = call.behaviour(0)?;
        let raw = call.get(1)?;
        let scope = raw
            .as_i32()
            .and_then(NetworkEventTarget::from_i32)
            .ok_or_else(|| ExternError::ArgumentType {
                index: 1,
                expected: "VRCUdonCommonInterfacesNetworkEventTarget",
                actual: raw.to_string(),
            })?;
        let event = call.get_string(2)?;
        target.send_custom_network_event(scope, &event);
        Ok(())
    });
}

fn debug_log(call: &ExternCall<'_>) -> Result<(), ExternError> {
    let message = match call.get(0)? {
        Value::String(s) => s,
        other => other.to_string(),
    };
    let behaviour = call.runtime().current_behaviour().map(|id| id.as_u64());
    info!(target: DEBUG_LOG_TARGET, behaviour, "{}", message);
    Ok(())
}
