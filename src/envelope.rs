// ==============================================================================
// Envelope Writer: Typed JSON Emission
// ==============================================================================
//
// Wraps a compiled message in the self-describing envelope and serializes it
// to disk. The envelope names the schema file the payload conforms to and
// carries the payload as a `google.protobuf.Any` (type URL + encoded bytes).
//
// Serialization goes through `prost-reflect`'s serde support with the session
// descriptor pool acting as the type resolver, so the `Any` is expanded
// inline as `{"@type": "...", ...fields}` rather than left as an opaque blob.
// Output is UTF-8 JSON, two-space indentation, stable map-key order, one
// trailing newline. Parent directories are created as needed; writes truncate
// any previous content.

use std::fs;
use std::path::Path;

use prost::Message as _;
use prost_reflect::{DynamicMessage, ReflectMessage, SerializeOptions, Value};

use crate::error::{Error, Result};
use crate::registry::SchemaRegistry;

/// Prefix of the type URL recorded alongside the payload bytes.
pub const TYPE_URL_PREFIX: &str = "type.googleapis.com/";

pub struct EnvelopeWriter<'a> {
    registry: &'a SchemaRegistry,
}

impl<'a> EnvelopeWriter<'a> {
    pub fn new(registry: &'a SchemaRegistry) -> Self {
        EnvelopeWriter { registry }
    }

    /// Render the envelope for one payload as the exact file contents.
    pub fn render(&self, payload: &DynamicMessage) -> Result<String> {
        let payload_type = payload.descriptor().full_name().to_string();
        let marshal = |message: String| Error::Marshal {
            context: payload_type.clone(),
            message,
        };

        let envelope_desc = self.registry.envelope()?;
        let proto_file = envelope_desc
            .get_field_by_name("proto_file")
            .ok_or_else(|| marshal("envelope lacks `proto_file`".to_string()))?;
        let value = envelope_desc
            .get_field_by_name("value")
            .ok_or_else(|| marshal("envelope lacks `value`".to_string()))?;

        let mut envelope = DynamicMessage::new(envelope_desc.clone());
        envelope.set_field(
            &proto_file,
            Value::String(payload.descriptor().parent_file().name().to_string()),
        );
        envelope.set_field(&value, Value::Message(self.pack_any(payload)?));

        let mut buf = Vec::new();
        let mut serializer = serde_json::Serializer::with_formatter(
            &mut buf,
            serde_json::ser::PrettyFormatter::with_indent(b"  "),
        );
        // Proto field names, not the JSON camelCase mapping: the envelope's
        // own `proto_file` key and every payload field keep their declared
        // spelling.
        let options = SerializeOptions::new().use_proto_field_name(true);
        envelope
            .serialize_with_options(&mut serializer, &options)
            .map_err(|e| marshal(e.to_string()))?;

        let mut text = String::from_utf8(buf).map_err(|e| marshal(e.to_string()))?;
        text.push('\n');
        Ok(text)
    }

    /// Render and write one output file, returning the emitted JSON for the
    /// caller's compile report.
    pub fn write(&self, path: &Path, payload: &DynamicMessage) -> Result<serde_json::Value> {
        let text = self.render(payload)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| Error::Write {
                path: path.to_path_buf(),
                source,
            })?;
        }
        fs::write(path, &text).map_err(|source| Error::Write {
            path: path.to_path_buf(),
            source,
        })?;

        serde_json::from_str(&text).map_err(|e| Error::Marshal {
            context: payload.descriptor().full_name().to_string(),
            message: format!("emitted JSON failed to re-parse: {e}"),
        })
    }

    /// Pack a payload into `google.protobuf.Any` form.
    fn pack_any(&self, payload: &DynamicMessage) -> Result<DynamicMessage> {
        let payload_type = payload.descriptor().full_name().to_string();
        let marshal = |message: String| Error::Marshal {
            context: payload_type.clone(),
            message,
        };

        let any_desc = self.registry.any()?;
        let type_url = any_desc
            .get_field_by_name("type_url")
            .ok_or_else(|| marshal("Any lacks `type_url`".to_string()))?;
        let value = any_desc
            .get_field_by_name("value")
            .ok_or_else(|| marshal("Any lacks `value`".to_string()))?;

        let mut any = DynamicMessage::new(any_desc.clone());
        any.set_field(
            &type_url,
            Value::String(format!("{TYPE_URL_PREFIX}{payload_type}")),
        );
        any.set_field(&value, Value::Bytes(payload.encode_to_vec().into()));
        Ok(any)
    }
}
