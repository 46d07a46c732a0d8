//! Invocation bridge
//!
//! Resolves a named operation in a unit's table and runs it with an
//! opaque argument list. Argument types are the backend's business; the
//! bridge only checks that the operation exists and that it produced as
//! many values as it declared.

use crate::HubError;
use plughub_api::{Unit, Value};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

/// Invoke `operation` on `unit` and return its values in order
pub fn invoke(unit: &dyn Unit, operation: &str, args: &[Value]) -> Result<Vec<Value>, HubError> {
    let descriptor = unit
        .operations()
        .get(operation)
        .ok_or_else(|| HubError::Lookup(operation.to_string()))?;

    let values = match panic::catch_unwind(AssertUnwindSafe(|| descriptor.invoke(args))) {
        Ok(Ok(values)) => values,
        Ok(Err(source)) => {
            return Err(HubError::Invocation {
                operation: operation.to_string(),
                source,
            })
        }
        Err(payload) => {
            return Err(HubError::Panic {
                operation: operation.to_string(),
                message: panic_message(payload.as_ref()),
            })
        }
    };

    if values.len() != descriptor.returns() {
        return Err(HubError::Arity {
            operation: operation.to_string(),
            declared: descriptor.returns(),
            actual: values.len(),
        });
    }

    Ok(values)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
