// ==============================================================================
// Script-to-Schema Bridge: Message Types and Instances as Script Values
// ==============================================================================
//
// Exposes parsed schemas to scripts and marshals script values back into
// typed messages. Each schema file becomes a rhai module in which every
// top-level message type appears twice under the same name:
//
//   - as a constant (`greet::Hello`), a `MessageType` handle used with
//     `add_validator`;
//   - as a constructor function, callable with no arguments for an empty
//     instance or with an object map for preset fields
//     (`greet::Hello(#{ name: "world" })`).
//
// Nested message types become sub-modules (`greet::Outer::Inner(...)`).
//
// A constructed instance is a `MessageValue`: a `prost_reflect`
// `DynamicMessage` behind string indexers. Rhai falls back to the indexer for
// property access on types with no registered getters, so `msg.name` and
// `msg.name = "x"` reach arbitrary schema fields without per-field
// registration, and rhai's indexer write-back keeps chained assignments like
// `msg.inner.count = 3` and in-place `msg.items.push(x)` working.
//
// Conversion is checked field-by-field: integers stay within the integer
// family (with range checks per width), floats within the float family,
// strings and bytes are distinct, enums accept an integer or a symbolic name,
// and message fields accept an instance of the exact descriptor or an object
// map constructed recursively. The instance *is* a `DynamicMessage` of the
// constructor's descriptor, so conversion back to a typed message is exact by
// construction.

use std::collections::HashMap;

use prost::bytes::Bytes;
use prost_reflect::{DynamicMessage, Kind, MapKey, MessageDescriptor, ReflectMessage, Value};
use rhai::{Array, Blob, Dynamic, Engine, EvalAltResult, Map, Module};

use crate::error::{self, Error, Result};

// ==============================================================================
// Script Value Types
// ==============================================================================

/// A message type as a script value; what `add_validator` binds against.
#[derive(Debug, Clone)]
pub struct MessageType {
    desc: MessageDescriptor,
}

impl MessageType {
    pub fn descriptor(&self) -> &MessageDescriptor {
        &self.desc
    }
}

/// A message instance as a script value.
#[derive(Debug, Clone)]
pub struct MessageValue {
    msg: DynamicMessage,
}

impl MessageValue {
    pub fn new(msg: DynamicMessage) -> Self {
        MessageValue { msg }
    }

    pub fn message(&self) -> &DynamicMessage {
        &self.msg
    }

    pub fn into_message(self) -> DynamicMessage {
        self.msg
    }

    /// Field read. Unset scalars yield the schema default; an unset singular
    /// message field yields a zero instance of the submessage.
    fn index_get(&mut self, field: &str) -> std::result::Result<Dynamic, Box<EvalAltResult>> {
        let desc = self.msg.descriptor();
        let fd = desc
            .get_field_by_name(field)
            .ok_or_else(|| unknown_field(&desc, field))?;
        Ok(to_dynamic(&self.msg.get_field(&fd)))
    }

    /// Field write, type-checked against the field's declared type.
    fn index_set(
        &mut self,
        field: &str,
        value: Dynamic,
    ) -> std::result::Result<(), Box<EvalAltResult>> {
        set_field(&mut self.msg, field, value).map_err(error::into_runtime)
    }
}

/// An immutable record built by the `struct` builtin. Reads go through the
/// indexer; no setter is registered, so assignment fails at the script level.
#[derive(Debug, Clone)]
pub struct StructValue {
    fields: Map,
}

impl StructValue {
    pub fn new(fields: Map) -> Self {
        StructValue { fields }
    }

    fn index_get(&mut self, field: &str) -> std::result::Result<Dynamic, Box<EvalAltResult>> {
        self.fields
            .get(field)
            .cloned()
            .ok_or_else(|| format!("struct has no field `{field}`").into())
    }
}

/// Register the bridge's script value types on an engine.
pub fn register_types(engine: &mut Engine) {
    engine
        .register_type_with_name::<MessageType>("MessageType")
        .register_get("name", |t: &mut MessageType| t.desc.name().to_string())
        .register_get("full_name", |t: &mut MessageType| {
            t.desc.full_name().to_string()
        })
        .register_fn("to_string", |t: &mut MessageType| {
            t.desc.full_name().to_string()
        });

    engine
        .register_type_with_name::<MessageValue>("Message")
        .register_indexer_get(MessageValue::index_get)
        .register_indexer_set(MessageValue::index_set)
        .register_fn("to_string", |m: &mut MessageValue| format!("{:?}", m.msg))
        .register_fn("==", |a: &mut MessageValue, b: MessageValue| a.msg == b.msg)
        .register_fn("!=", |a: &mut MessageValue, b: MessageValue| a.msg != b.msg);

    engine
        .register_type_with_name::<StructValue>("Struct")
        .register_indexer_get(StructValue::index_get)
        .register_fn("to_string", |s: &mut StructValue| format!("{:?}", s.fields));
}

// ==============================================================================
// Schema Modules
// ==============================================================================

/// Build the script module for a schema file's top-level message types.
pub fn schema_module(messages: &[MessageDescriptor]) -> Module {
    let mut module = Module::new();
    for desc in messages {
        install_message(&mut module, desc);
    }
    module
}

fn install_message(module: &mut Module, desc: &MessageDescriptor) {
    let name = desc.name().to_string();

    module.set_var(name.as_str(), MessageType { desc: desc.clone() });

    {
        let desc = desc.clone();
        module.set_native_fn(
            name.as_str(),
            move || -> std::result::Result<MessageValue, Box<EvalAltResult>> {
                Ok(MessageValue::new(DynamicMessage::new(desc.clone())))
            },
        );
    }
    {
        let desc = desc.clone();
        module.set_native_fn(
            name.as_str(),
            move |fields: Map| -> std::result::Result<MessageValue, Box<EvalAltResult>> {
                new_message(&desc, fields).map_err(error::into_runtime)
            },
        );
    }

    // Synthetic map-entry types are an encoding detail, not constructible
    // script values.
    let nested: Vec<MessageDescriptor> = desc
        .child_messages()
        .filter(|m| !m.is_map_entry())
        .collect();
    if !nested.is_empty() {
        let mut sub = schema_module(&nested);
        sub.build_index();
        module.set_sub_module(name.as_str(), sub);
    }
}

// ==============================================================================
// Script Value -> Typed Message
// ==============================================================================

/// Construct an instance of `desc` with the given preset fields.
pub fn new_message(desc: &MessageDescriptor, fields: Map) -> Result<MessageValue> {
    let mut msg = DynamicMessage::new(desc.clone());
    for (name, value) in fields {
        set_field(&mut msg, name.as_str(), value)?;
    }
    Ok(MessageValue::new(msg))
}

fn set_field(msg: &mut DynamicMessage, name: &str, value: Dynamic) -> Result<()> {
    let desc = msg.descriptor();
    let field = desc.get_field_by_name(name).ok_or_else(|| Error::UnknownField {
        message_type: desc.full_name().to_string(),
        field: name.to_string(),
    })?;
    let value = to_proto_value(desc.full_name(), &field, value)?;
    msg.set_field(&field, value);
    Ok(())
}

fn to_proto_value(
    message_type: &str,
    field: &prost_reflect::FieldDescriptor,
    value: Dynamic,
) -> Result<Value> {
    if field.is_map() {
        let Kind::Message(entry) = field.kind() else {
            return Err(mismatch(message_type, field.name(), "map entry descriptor missing"));
        };
        let key_kind = entry.map_entry_key_field().kind();
        let value_kind = entry.map_entry_value_field().kind();
        let got = type_label(&value);
        let map: Map = value.try_cast().ok_or_else(|| {
            mismatch(message_type, field.name(), &format!("expected an object map, got {got}"))
        })?;
        let mut out = HashMap::with_capacity(map.len());
        for (k, v) in map {
            let key = parse_map_key(message_type, field.name(), &key_kind, k.as_str())?;
            let val = to_proto_single(message_type, field.name(), &value_kind, v)?;
            out.insert(key, val);
        }
        Ok(Value::Map(out))
    } else if field.is_list() {
        let got = type_label(&value);
        let items: Array = value.try_cast().ok_or_else(|| {
            mismatch(message_type, field.name(), &format!("expected an array, got {got}"))
        })?;
        let kind = field.kind();
        let converted = items
            .into_iter()
            .map(|item| to_proto_single(message_type, field.name(), &kind, item))
            .collect::<Result<Vec<_>>>()?;
        Ok(Value::List(converted))
    } else {
        to_proto_single(message_type, field.name(), &field.kind(), value)
    }
}

/// Convert one scalar/enum/message value. Integer widths are range-checked;
/// cross-family assignments (int where a float is declared, and vice versa)
/// are rejected.
fn to_proto_single(message_type: &str, field: &str, kind: &Kind, value: Dynamic) -> Result<Value> {
    let got = type_label(&value);
    let expect = |what: &str| mismatch(message_type, field, &format!("expected {what}, got {got}"));

    match kind {
        Kind::Double => value.as_float().map(Value::F64).map_err(|_| expect("a float")),
        Kind::Float => value
            .as_float()
            .map(|f| Value::F32(f as f32))
            .map_err(|_| expect("a float")),
        Kind::Int32 | Kind::Sint32 | Kind::Sfixed32 => {
            let i = value.as_int().map_err(|_| expect("an integer"))?;
            i32::try_from(i)
                .map(Value::I32)
                .map_err(|_| mismatch(message_type, field, &format!("{i} out of range for a 32-bit integer")))
        }
        Kind::Int64 | Kind::Sint64 | Kind::Sfixed64 => {
            value.as_int().map(Value::I64).map_err(|_| expect("an integer"))
        }
        Kind::Uint32 | Kind::Fixed32 => {
            let i = value.as_int().map_err(|_| expect("an integer"))?;
            u32::try_from(i)
                .map(Value::U32)
                .map_err(|_| mismatch(message_type, field, &format!("{i} out of range for an unsigned 32-bit integer")))
        }
        Kind::Uint64 | Kind::Fixed64 => {
            let i = value.as_int().map_err(|_| expect("an integer"))?;
            u64::try_from(i)
                .map(Value::U64)
                .map_err(|_| mismatch(message_type, field, &format!("{i} must not be negative")))
        }
        Kind::Bool => value.as_bool().map(Value::Bool).map_err(|_| expect("a bool")),
        Kind::String => value
            .into_immutable_string()
            .map(|s| Value::String(s.to_string()))
            .map_err(|_| expect("a string")),
        Kind::Bytes => value
            .try_cast::<Blob>()
            .map(|b| Value::Bytes(Bytes::copy_from_slice(&b)))
            .ok_or_else(|| expect("a blob")),
        Kind::Enum(enum_desc) => {
            if value.is_int() {
                let i = value.as_int().expect("int checked above");
                let n = i32::try_from(i).map_err(|_| {
                    mismatch(message_type, field, &format!("{i} out of range for enum `{}`", enum_desc.full_name()))
                })?;
                // Proto3 enums are open; unknown numbers are preserved.
                Ok(Value::EnumNumber(n))
            } else if value.is_string() {
                let name = value.into_immutable_string().expect("string checked above");
                enum_desc
                    .get_value_by_name(&name)
                    .map(|v| Value::EnumNumber(v.number()))
                    .ok_or_else(|| {
                        mismatch(
                            message_type,
                            field,
                            &format!("`{name}` is not a value of enum `{}`", enum_desc.full_name()),
                        )
                    })
            } else {
                Err(expect("an integer or enum value name"))
            }
        }
        Kind::Message(msg_desc) => {
            if value.is::<MessageValue>() {
                let instance = value.cast::<MessageValue>();
                let actual = instance.msg.descriptor();
                if actual.full_name() != msg_desc.full_name() {
                    return Err(mismatch(
                        message_type,
                        field,
                        &format!(
                            "expected message `{}`, got message `{}`",
                            msg_desc.full_name(),
                            actual.full_name()
                        ),
                    ));
                }
                Ok(Value::Message(instance.msg))
            } else if value.is_map() {
                let map = value.cast::<Map>();
                Ok(Value::Message(new_message(msg_desc, map)?.into_message()))
            } else {
                Err(expect(&format!("a `{}` message", msg_desc.full_name())))
            }
        }
    }
}

fn parse_map_key(message_type: &str, field: &str, kind: &Kind, key: &str) -> Result<MapKey> {
    let bad = |what: &str| {
        mismatch(message_type, field, &format!("map key `{key}` is not {what}"))
    };
    match kind {
        Kind::String => Ok(MapKey::String(key.to_string())),
        Kind::Bool => key.parse().map(MapKey::Bool).map_err(|_| bad("a bool")),
        Kind::Int32 | Kind::Sint32 | Kind::Sfixed32 => {
            key.parse().map(MapKey::I32).map_err(|_| bad("a 32-bit integer"))
        }
        Kind::Int64 | Kind::Sint64 | Kind::Sfixed64 => {
            key.parse().map(MapKey::I64).map_err(|_| bad("a 64-bit integer"))
        }
        Kind::Uint32 | Kind::Fixed32 => {
            key.parse().map(MapKey::U32).map_err(|_| bad("an unsigned 32-bit integer"))
        }
        Kind::Uint64 | Kind::Fixed64 => {
            key.parse().map(MapKey::U64).map_err(|_| bad("an unsigned 64-bit integer"))
        }
        other => Err(mismatch(
            message_type,
            field,
            &format!("unsupported map key kind {other:?}"),
        )),
    }
}

// ==============================================================================
// Typed Message -> Script Value
// ==============================================================================

/// Convert a field value into its script representation. Submessages come out
/// as `MessageValue`s, repeated fields as arrays, maps as object maps with
/// stringified keys, enums as their numbers.
fn to_dynamic(value: &Value) -> Dynamic {
    match value {
        Value::Bool(b) => (*b).into(),
        Value::I32(v) => Dynamic::from(i64::from(*v)),
        Value::I64(v) => Dynamic::from(*v),
        Value::U32(v) => Dynamic::from(i64::from(*v)),
        // Values beyond i64::MAX wrap; script integers are i64.
        Value::U64(v) => Dynamic::from(*v as i64),
        Value::F32(v) => Dynamic::from(f64::from(*v)),
        Value::F64(v) => Dynamic::from(*v),
        Value::String(s) => s.clone().into(),
        Value::Bytes(b) => Dynamic::from_blob(b.to_vec()),
        Value::EnumNumber(n) => Dynamic::from(i64::from(*n)),
        Value::Message(m) => Dynamic::from(MessageValue::new(m.clone())),
        Value::List(items) => Dynamic::from_array(items.iter().map(to_dynamic).collect()),
        Value::Map(entries) => {
            let mut map = Map::new();
            for (k, v) in entries {
                map.insert(map_key_string(k).into(), to_dynamic(v));
            }
            Dynamic::from_map(map)
        }
    }
}

/// Stable string form of a map key; the script-side map key and the sort key
/// for deterministic traversal.
pub(crate) fn map_key_string(key: &MapKey) -> String {
    match key {
        MapKey::Bool(b) => b.to_string(),
        MapKey::I32(v) => v.to_string(),
        MapKey::I64(v) => v.to_string(),
        MapKey::U32(v) => v.to_string(),
        MapKey::U64(v) => v.to_string(),
        MapKey::String(s) => s.clone(),
    }
}

// ==============================================================================
// Error Helpers
// ==============================================================================

fn mismatch(message_type: &str, field: &str, message: &str) -> Error {
    Error::TypeMismatch {
        message_type: message_type.to_string(),
        field: field.to_string(),
        message: message.to_string(),
    }
}

fn unknown_field(desc: &MessageDescriptor, field: &str) -> Box<EvalAltResult> {
    error::into_runtime(Error::UnknownField {
        message_type: desc.full_name().to_string(),
        field: field.to_string(),
    })
}

/// Human-oriented label for a script value in type errors.
pub(crate) fn type_label(value: &Dynamic) -> String {
    if value.is::<MessageValue>() {
        let full_name = value
            .clone()
            .cast::<MessageValue>()
            .msg
            .descriptor()
            .full_name()
            .to_string();
        format!("message `{full_name}`")
    } else if value.is::<StructValue>() {
        "a struct".to_string()
    } else {
        value.type_name().to_string()
    }
}
