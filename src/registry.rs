// ==============================================================================
// Schema Registry: Descriptor Pool Management and Type Resolution
// ==============================================================================
//
// Owns the schema side of a compilation session. A `protox::Compiler`
// accumulates every `.proto` file opened during the session, and a
// `prost_reflect::DescriptorPool` mirrors the compiler's output so descriptors
// can be handed to the bridge and, at emission time, resolve the type URL of
// the payload embedded in the envelope's `google.protobuf.Any` field.
//
// The compiler's file resolver chain is, in order:
//   1. the embedded envelope schema (see `ENVELOPE_PROTO` below),
//   2. the project's source root,
//   3. protox's bundled Google well-known types (for `any.proto`).
//
// That chain is also the read sandbox for schemas: nothing outside the source
// root is ever opened from disk.
//
// The pool only ever grows within a session, so a descriptor handed out early
// stays resolvable at emission time. Each `ingest` merges the not-yet-seen
// files of the newly opened file's transitive closure; protox returns the
// closure in topological order, so dependencies always land first.

use std::path::Path;

use indexmap::IndexMap;
use prost_reflect::{DescriptorPool, MessageDescriptor};
use prost_types::FileDescriptorSet;
use protox::Compiler;
use protox::file::{ChainFileResolver, File, FileResolver, GoogleFileResolver, IncludeFileResolver};

use crate::error::{Error, Result};

/// File name the embedded envelope schema is registered under.
pub const ENVELOPE_FILE: &str = "pconf/v1/envelope.proto";
/// Fully qualified name of the envelope message type.
pub const ENVELOPE_TYPE: &str = "pconf.v1.MaterializedValue";

/// The outer wrapper every compiled message is emitted inside: the schema
/// file the payload conforms to, plus the payload as a self-describing
/// `Any`.
const ENVELOPE_PROTO: &str = r#"syntax = "proto3";

package pconf.v1;

import "google/protobuf/any.proto";

message MaterializedValue {
  string proto_file = 1;
  google.protobuf.Any value = 2;
}
"#;

/// Serves the embedded envelope schema to the compiler without touching disk.
struct EnvelopeSource;

impl FileResolver for EnvelopeSource {
    fn open_file(&self, name: &str) -> std::result::Result<File, protox::Error> {
        if name == ENVELOPE_FILE {
            File::from_source(name, ENVELOPE_PROTO)
        } else {
            Err(protox::Error::file_not_found(name))
        }
    }
}

pub struct SchemaRegistry {
    compiler: Compiler,
    pool: DescriptorPool,
    /// Top-level message descriptors per ingested schema file, in ingestion
    /// order, keyed by root-relative file name.
    files: IndexMap<String, Vec<MessageDescriptor>>,
}

impl SchemaRegistry {
    /// Create a registry for one compilation session and seed it with the
    /// envelope schema (and, transitively, `google/protobuf/any.proto`).
    pub fn new(src_root: &Path) -> Result<Self> {
        let mut resolver = ChainFileResolver::new();
        resolver.add(EnvelopeSource);
        resolver.add(IncludeFileResolver::new(src_root.to_path_buf()));
        resolver.add(GoogleFileResolver::new());

        let mut compiler = Compiler::with_file_resolver(resolver);
        compiler.include_imports(true);

        let mut registry = SchemaRegistry {
            compiler,
            pool: DescriptorPool::new(),
            files: IndexMap::new(),
        };
        registry.open(ENVELOPE_FILE)?;
        registry.sync_pool()?;
        Ok(registry)
    }

    /// Compile one schema file (named relative to the source root) and
    /// register its descriptors. Returns the file's top-level message types
    /// in declaration order.
    pub fn ingest(&mut self, rel_name: &str) -> Result<Vec<MessageDescriptor>> {
        if let Some(existing) = self.files.get(rel_name) {
            return Ok(existing.clone());
        }

        self.open(rel_name)?;
        self.sync_pool()?;

        let file = self
            .pool
            .get_file_by_name(rel_name)
            .ok_or_else(|| Error::SchemaParse {
                path: rel_name.to_string(),
                message: "compiled file missing from descriptor pool".to_string(),
            })?;
        let messages: Vec<MessageDescriptor> = file.messages().collect();
        self.files.insert(rel_name.to_string(), messages.clone());
        Ok(messages)
    }

    /// Resolve a fully qualified message type name against the pool.
    pub fn get_message(&self, full_name: &str) -> Option<MessageDescriptor> {
        self.pool.get_message_by_name(full_name)
    }

    /// Descriptor of the envelope wrapper message.
    pub fn envelope(&self) -> Result<MessageDescriptor> {
        self.get_message(ENVELOPE_TYPE).ok_or_else(|| Error::Marshal {
            context: ENVELOPE_TYPE.to_string(),
            message: "envelope type missing from descriptor pool".to_string(),
        })
    }

    /// Descriptor of `google.protobuf.Any`, the payload container.
    pub fn any(&self) -> Result<MessageDescriptor> {
        self.get_message("google.protobuf.Any")
            .ok_or_else(|| Error::Marshal {
                context: "google.protobuf.Any".to_string(),
                message: "well-known types missing from descriptor pool".to_string(),
            })
    }

    fn open(&mut self, rel_name: &str) -> Result<()> {
        self.compiler
            .open_file(rel_name)
            .map_err(|e| Error::SchemaParse {
                path: rel_name.to_string(),
                message: e.to_string(),
            })?;
        Ok(())
    }

    /// Merge files the compiler knows but the pool does not yet hold.
    fn sync_pool(&mut self) -> Result<()> {
        let set = self.compiler.file_descriptor_set();
        let new_files: Vec<_> = set
            .file
            .into_iter()
            .filter(|f| self.pool.get_file_by_name(f.name()).is_none())
            .collect();
        if new_files.is_empty() {
            return Ok(());
        }
        self.pool
            .add_file_descriptor_set(FileDescriptorSet { file: new_files })
            .map_err(|e| Error::SchemaParse {
                path: "<descriptor pool>".to_string(),
                message: e.to_string(),
            })
    }
}
