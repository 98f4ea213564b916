//! Built-in functions available to every rule.

use std::net::IpAddr;
use std::sync::Arc;

use super::function::{FnFunction, Function, FunctionArgs, FunctionDescriptor, ParameterDescriptor};
use crate::lang::{Value, ValueType};
use crate::runtime::{EvalError, EvalResult};

/// Every built-in function.
pub fn all() -> Vec<Arc<dyn Function>> {
    vec![
        set_field(),
        has_field(),
        remove_field(),
        get_field(),
        to_string(),
        to_long(),
        to_double(),
        to_bool(),
        concat(),
        lowercase(),
        uppercase(),
        contains(),
        is_null(),
        is_private_ip(),
        source_ip_is_private(),
        drop_message(),
    ]
}

fn field_param() -> ParameterDescriptor {
    ParameterDescriptor::required("field", ValueType::String).describe("message field name")
}

fn function_error(args: &FunctionArgs, message: impl Into<String>) -> EvalError {
    EvalError::Function {
        name: args.function().to_string(),
        message: message.into(),
    }
}

fn set_field() -> Arc<dyn Function> {
    let descriptor = FunctionDescriptor::new("set_field", ValueType::Void)
        .with_param(field_param())
        .with_param(ParameterDescriptor::required("value", ValueType::Any))
        .impure()
        .describe("Set a message field; null values are ignored");
    FnFunction::shared(descriptor, |args, context| {
        let field = args.required_string("field")?;
        if field.is_empty() {
            return Err(function_error(args, "field name must not be empty"));
        }
        if let Some(value) = args.get("value") {
            context.message_mut().set_field(field, value.clone());
        }
        Ok(Value::Null)
    })
}

fn has_field() -> Arc<dyn Function> {
    let descriptor = FunctionDescriptor::new("has_field", ValueType::Boolean).with_param(field_param());
    FnFunction::shared(descriptor, |args, context| {
        let field = args.required_string("field")?;
        Ok(Value::Boolean(context.message().has_field(field)))
    })
}

fn remove_field() -> Arc<dyn Function> {
    let descriptor = FunctionDescriptor::new("remove_field", ValueType::Void)
        .with_param(field_param())
        .impure();
    FnFunction::shared(descriptor, |args, context| {
        let field = args.required_string("field")?;
        context.message_mut().remove_field(field);
        Ok(Value::Null)
    })
}

fn get_field() -> Arc<dyn Function> {
    let descriptor = FunctionDescriptor::new("get_field", ValueType::Any).with_param(field_param());
    FnFunction::shared(descriptor, |args, context| {
        let field = args.required_string("field")?;
        Ok(context.message().get_field(field).cloned().unwrap_or_default())
    })
}

fn to_string() -> Arc<dyn Function> {
    let descriptor = FunctionDescriptor::new("to_string", ValueType::String)
        .with_param(ParameterDescriptor::required("value", ValueType::Any))
        .with_param(ParameterDescriptor::optional("default", ValueType::String).with_default(""));
    FnFunction::shared(descriptor, |args, _| {
        Ok(match args.get("value") {
            Some(value) => Value::String(value.to_string()),
            None => args.get("default").cloned().unwrap_or_default(),
        })
    })
}

fn to_long() -> Arc<dyn Function> {
    let descriptor = FunctionDescriptor::new("to_long", ValueType::Long)
        .with_param(ParameterDescriptor::required("value", ValueType::Any))
        .with_param(ParameterDescriptor::optional("default", ValueType::Long).with_default(0i64));
    FnFunction::shared(descriptor, |args, _| {
        let converted = match args.get("value") {
            Some(Value::Long(num)) => Some(*num),
            Some(Value::Double(num)) if num.is_finite() => Some(num.trunc() as i64),
            Some(Value::String(text)) => text.trim().parse::<i64>().ok(),
            Some(Value::Boolean(flag)) => Some(i64::from(*flag)),
            _ => None,
        };
        Ok(match converted {
            Some(num) => Value::Long(num),
            None => args.get("default").cloned().unwrap_or(Value::Long(0)),
        })
    })
}

fn to_double() -> Arc<dyn Function> {
    let descriptor = FunctionDescriptor::new("to_double", ValueType::Double)
        .with_param(ParameterDescriptor::required("value", ValueType::Any))
        .with_param(ParameterDescriptor::optional("default", ValueType::Double).with_default(0.0));
    FnFunction::shared(descriptor, |args, _| {
        let converted = match args.get("value") {
            Some(Value::String(text)) => text.trim().parse::<f64>().ok(),
            Some(other) => other.as_f64(),
            None => None,
        };
        Ok(match converted {
            Some(num) => Value::Double(num),
            None => args.get("default").cloned().unwrap_or(Value::Double(0.0)),
        })
    })
}

fn to_bool() -> Arc<dyn Function> {
    let descriptor = FunctionDescriptor::new("to_bool", ValueType::Boolean)
        .with_param(ParameterDescriptor::required("value", ValueType::Any));
    FnFunction::shared(descriptor, |args, _| {
        let flag = match args.get("value") {
            Some(Value::Boolean(flag)) => *flag,
            Some(Value::String(text)) => text.trim().eq_ignore_ascii_case("true"),
            Some(Value::Long(num)) => *num != 0,
            Some(Value::Double(num)) => *num != 0.0,
            _ => false,
        };
        Ok(Value::Boolean(flag))
    })
}

fn concat() -> Arc<dyn Function> {
    let descriptor = FunctionDescriptor::new("concat", ValueType::String)
        .with_param(ParameterDescriptor::required("first", ValueType::String))
        .with_param(ParameterDescriptor::required("second", ValueType::String));
    FnFunction::shared(descriptor, |args, _| {
        let render = |name: &str| args.get(name).map(Value::to_string).unwrap_or_default();
        Ok(Value::String(format!("{}{}", render("first"), render("second"))))
    })
}

fn lowercase() -> Arc<dyn Function> {
    let descriptor = FunctionDescriptor::new("lowercase", ValueType::String)
        .with_param(ParameterDescriptor::required("value", ValueType::String));
    FnFunction::shared(descriptor, |args, _| {
        Ok(Value::String(args.required_string("value")?.to_lowercase()))
    })
}

fn uppercase() -> Arc<dyn Function> {
    let descriptor = FunctionDescriptor::new("uppercase", ValueType::String)
        .with_param(ParameterDescriptor::required("value", ValueType::String));
    FnFunction::shared(descriptor, |args, _| {
        Ok(Value::String(args.required_string("value")?.to_uppercase()))
    })
}

fn contains() -> Arc<dyn Function> {
    let descriptor = FunctionDescriptor::new("contains", ValueType::Boolean)
        .with_param(ParameterDescriptor::required("value", ValueType::String))
        .with_param(ParameterDescriptor::required("search", ValueType::String))
        .with_param(
            ParameterDescriptor::optional("ignore_case", ValueType::Boolean).with_default(false),
        );
    FnFunction::shared(descriptor, |args, _| {
        let value = args.required_string("value")?;
        let search = args.required_string("search")?;
        let found = if args.optional_bool("ignore_case")?.unwrap_or(false) {
            value.to_lowercase().contains(&search.to_lowercase())
        } else {
            value.contains(search)
        };
        Ok(Value::Boolean(found))
    })
}

fn is_null() -> Arc<dyn Function> {
    let descriptor = FunctionDescriptor::new("is_null", ValueType::Boolean)
        .with_param(ParameterDescriptor::required("value", ValueType::Any));
    FnFunction::shared(descriptor, |args, _| {
        Ok(Value::Boolean(args.get("value").is_none()))
    })
}

/// RFC 1918, loopback and link-local IPv4; unique-local, loopback and
/// link-local IPv6.
pub fn is_private_address(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => v4.is_private() || v4.is_loopback() || v4.is_link_local(),
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            v6.is_loopback() || (first & 0xfe00) == 0xfc00 || (first & 0xffc0) == 0xfe80
        }
    }
}

fn parse_ip(args: &FunctionArgs, text: &str) -> EvalResult<IpAddr> {
    text.trim()
        .parse::<IpAddr>()
        .map_err(|_| function_error(args, format!("'{}' is not an IP address", text)))
}

fn is_private_ip() -> Arc<dyn Function> {
    let descriptor = FunctionDescriptor::new("is_private_ip", ValueType::Boolean)
        .with_param(ParameterDescriptor::required("ip", ValueType::String));
    FnFunction::shared(descriptor, |args, _| {
        let addr = parse_ip(args, args.required_string("ip")?)?;
        Ok(Value::Boolean(is_private_address(addr)))
    })
}

fn source_ip_is_private() -> Arc<dyn Function> {
    let descriptor = FunctionDescriptor::new("source_ip_is_private", ValueType::Boolean)
        .with_param(
            ParameterDescriptor::optional("field", ValueType::String)
                .with_default("source")
                .describe("field holding the address"),
        )
        .describe("Whether the message's source address is private; false when absent");
    FnFunction::shared(descriptor, |args, context| {
        let field = args.required_string("field")?;
        match context.message().get_field(field) {
            Some(Value::String(text)) => {
                let addr = parse_ip(args, text)?;
                Ok(Value::Boolean(is_private_address(addr)))
            }
            Some(Value::Null) | None => Ok(Value::Boolean(false)),
            Some(other) => Err(EvalError::type_mismatch(ValueType::String, other)),
        }
    })
}

fn drop_message() -> Arc<dyn Function> {
    let descriptor = FunctionDescriptor::new("drop_message", ValueType::Void)
        .impure()
        .describe("Stop processing after the current stage and discard the message");
    FnFunction::shared(descriptor, |_, context| {
        context.message_mut().set_dropped(true);
        Ok(Value::Null)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::FunctionRegistry;
    use crate::runtime::{EvaluationContext, Message};

    fn call(name: &str, supplied: Vec<(&str, Value)>, message: &mut Message) -> EvalResult<Value> {
        let function = FunctionRegistry::builtin().resolve_or_error(name);
        let supplied = supplied
            .into_iter()
            .map(|(key, value)| (key.to_string(), value))
            .collect();
        let args = FunctionArgs::bind(name, function.descriptor(), supplied)?;
        let mut context = EvaluationContext::new(message);
        function.evaluate(&args, &mut context)
    }

    #[test]
    fn private_address_ranges() {
        for addr in ["10.1.2.3", "172.16.0.1", "192.168.1.5", "127.0.0.1", "fd00::1", "fe80::1"] {
            assert!(is_private_address(addr.parse().unwrap()), "{}", addr);
        }
        for addr in ["8.8.8.8", "172.32.0.1", "2001:db8::1"] {
            assert!(!is_private_address(addr.parse().unwrap()), "{}", addr);
        }
    }

    #[test]
    fn source_ip_defaults_to_source_field() {
        let mut message = Message::new().with_field("source", "192.168.1.5");
        assert_eq!(
            call("source_ip_is_private", vec![], &mut message).unwrap(),
            Value::Boolean(true)
        );
        let mut empty = Message::new();
        assert_eq!(
            call("source_ip_is_private", vec![], &mut empty).unwrap(),
            Value::Boolean(false)
        );
    }

    #[test]
    fn invalid_ip_is_a_fault() {
        let mut message = Message::new();
        let err = call("is_private_ip", vec![("ip", Value::from("nope"))], &mut message).unwrap_err();
        assert!(matches!(err, EvalError::Function { ref name, .. } if name == "is_private_ip"));
    }

    #[test]
    fn conversions_fall_back_to_defaults() {
        let mut message = Message::new();
        assert_eq!(
            call("to_long", vec![("value", Value::from("12"))], &mut message).unwrap(),
            Value::Long(12)
        );
        assert_eq!(
            call(
                "to_long",
                vec![("value", Value::from("x")), ("default", Value::Long(-1))],
                &mut message
            )
            .unwrap(),
            Value::Long(-1)
        );
        assert_eq!(
            call("to_string", vec![("value", Value::Null)], &mut message).unwrap(),
            Value::from("")
        );
    }

    #[test]
    fn field_functions_mutate_message() {
        let mut message = Message::new();
        call(
            "set_field",
            vec![("field", Value::from("a")), ("value", Value::Long(1))],
            &mut message,
        )
        .unwrap();
        assert_eq!(message.get_field("a"), Some(&Value::Long(1)));
        call("remove_field", vec![("field", Value::from("a"))], &mut message).unwrap();
        assert!(!message.has_field("a"));
        call("drop_message", vec![], &mut message).unwrap();
        assert!(message.is_dropped());
    }
}
