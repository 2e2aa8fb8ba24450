//! Local provider - simulates a cloud API on the filesystem
//!
//! Each resource is a JSON document under
//! `<root>/<kind>/<provider id>.json`. Provider ids look like cloud ids
//! (`vpc-3f9a1c0b7d2e`) and outputs carry the usual computed attributes, so
//! configurations can be planned and applied end to end without
//! credentials.

use anyhow::{Result, bail};
use declarative::{ApplyContext, Attributes, Created, Provider, ProviderError};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tempfile::NamedTempFile;

use crate::config::ProviderSettings;

/// Build the provider named in configuration
pub fn from_settings(settings: &ProviderSettings, root: &Path) -> Result<Box<dyn Provider>> {
    match settings.name.as_str() {
        "local" => Ok(Box::new(LocalProvider::new(root, &settings.region))),
        other => bail!("Unknown provider '{other}' (available: local)"),
    }
}

/// Stored form of a resource
#[derive(Debug, Serialize, Deserialize)]
struct Document {
    kind: String,
    resource: String,
    provider_id: String,
    properties: Attributes,
    outputs: Attributes,
}

#[derive(Debug)]
pub struct LocalProvider {
    root: PathBuf,
    region: String,
    counter: AtomicU64,
}

impl LocalProvider {
    pub fn new(root: impl Into<PathBuf>, region: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            region: region.into(),
            counter: AtomicU64::new(0),
        }
    }

    fn document_path(&self, kind: &str, provider_id: &str) -> PathBuf {
        self.root.join(kind).join(format!("{provider_id}.json"))
    }

    /// Fresh provider id: kind prefix and 12 hex chars of a blake3 hash
    fn allocate_id(&self, ctx: &ApplyContext, kind: &str, properties: &Attributes) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(ctx.resource.to_string().as_bytes());
        hasher.update(&serde_json::to_vec(properties).unwrap_or_default());
        let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
        hasher.update(&nanos.to_le_bytes());
        hasher.update(&self.counter.fetch_add(1, Ordering::SeqCst).to_le_bytes());
        let hash = hasher.finalize().to_hex();
        format!("{}-{}", kind_prefix(kind), &hash.as_str()[..12])
    }

    fn outputs(&self, kind: &str, provider_id: &str, properties: &Attributes) -> Attributes {
        let mut outputs = properties.clone();
        outputs.insert("id".into(), json!(provider_id));
        outputs.insert(
            "arn".into(),
            json!(format!("arn:local:{}:{kind}/{provider_id}", self.region)),
        );
        if kind.contains("load_balancer") {
            outputs.insert(
                "dns_name".into(),
                json!(format!("{provider_id}.{}.elb.local", self.region)),
            );
        }
        outputs
    }

    fn load(&self, kind: &str, provider_id: &str) -> Result<Option<Document>, ProviderError> {
        let path = self.document_path(kind, provider_id);
        match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).map(Some).map_err(|e| {
                ProviderError::other(format!("corrupt document {}: {e}", path.display()))
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write a document atomically
    fn store(&self, doc: &Document) -> Result<(), ProviderError> {
        let path = self.document_path(&doc.kind, &doc.provider_id);
        let dir = path
            .parent()
            .ok_or_else(|| ProviderError::other("document path has no parent"))?;
        fs::create_dir_all(dir)?;

        let content = serde_json::to_vec_pretty(doc)
            .map_err(|e| ProviderError::other(e.to_string()))?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(&content)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| ProviderError::from(e.error))?;
        Ok(())
    }
}

impl Provider for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }

    fn create(
        &self,
        ctx: &ApplyContext,
        kind: &str,
        properties: &Attributes,
    ) -> Result<Created, ProviderError> {
        let provider_id = self.allocate_id(ctx, kind, properties);
        let outputs = self.outputs(kind, &provider_id, properties);
        self.store(&Document {
            kind: kind.to_string(),
            resource: ctx.resource.to_string(),
            provider_id: provider_id.clone(),
            properties: properties.clone(),
            outputs: outputs.clone(),
        })?;
        log::debug!("Created {} as {}", ctx.resource, provider_id);
        Ok(Created {
            provider_id,
            outputs,
        })
    }

    fn read(
        &self,
        _ctx: &ApplyContext,
        kind: &str,
        provider_id: &str,
    ) -> Result<Option<Attributes>, ProviderError> {
        Ok(self.load(kind, provider_id)?.map(|doc| doc.outputs))
    }

    fn update(
        &self,
        ctx: &ApplyContext,
        kind: &str,
        provider_id: &str,
        properties: &Attributes,
    ) -> Result<Attributes, ProviderError> {
        let Some(mut doc) = self.load(kind, provider_id)? else {
            return Err(ProviderError::not_found(format!("{kind} {provider_id}")));
        };
        doc.outputs = self.outputs(kind, provider_id, properties);
        doc.properties = properties.clone();
        self.store(&doc)?;
        log::debug!("Updated {} ({})", ctx.resource, provider_id);
        Ok(doc.outputs)
    }

    fn delete(
        &self,
        ctx: &ApplyContext,
        kind: &str,
        provider_id: &str,
    ) -> Result<(), ProviderError> {
        fs::remove_file(self.document_path(kind, provider_id))?;
        log::debug!("Deleted {} ({})", ctx.resource, provider_id);
        Ok(())
    }
}

/// Id prefix for a kind: initials of multi-word kinds, the kind otherwise
fn kind_prefix(kind: &str) -> String {
    let words: Vec<&str> = kind.split('_').filter(|w| !w.is_empty()).collect();
    if words.len() > 1 {
        words.iter().filter_map(|w| w.chars().next()).collect()
    } else {
        kind.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use declarative::{CancelToken, ErrorCategory, ResourceId};
    use tempfile::TempDir;

    fn attrs(value: serde_json::Value) -> Attributes {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_kind_prefix() {
        assert_eq!(kind_prefix("vpc"), "vpc");
        assert_eq!(kind_prefix("security_group"), "sg");
        assert_eq!(kind_prefix("load_balancer"), "lb");
        assert_eq!(kind_prefix("ecs_task_definition"), "etd");
    }

    #[test]
    fn test_lifecycle() {
        let dir = TempDir::new().unwrap();
        let provider = LocalProvider::new(dir.path(), "us-east-1");
        let id = ResourceId::new("load_balancer", "web");
        let cancel = CancelToken::new();
        let ctx = ApplyContext::new(&id, &cancel);

        let created = provider
            .create(&ctx, "load_balancer", &attrs(json!({"scheme": "internal"})))
            .unwrap();
        assert!(created.provider_id.starts_with("lb-"));
        assert_eq!(created.provider_id.len(), "lb-".len() + 12);
        assert_eq!(created.outputs["scheme"], json!("internal"));
        assert_eq!(
            created.outputs["arn"],
            json!(format!("arn:local:us-east-1:load_balancer/{}", created.provider_id))
        );
        assert!(created.outputs.contains_key("dns_name"));
        assert!(
            dir.path()
                .join("load_balancer")
                .join(format!("{}.json", created.provider_id))
                .exists()
        );

        let read = provider
            .read(&ctx, "load_balancer", &created.provider_id)
            .unwrap();
        assert_eq!(read, Some(created.outputs.clone()));

        let updated = provider
            .update(
                &ctx,
                "load_balancer",
                &created.provider_id,
                &attrs(json!({"scheme": "internal", "idle_timeout": 60})),
            )
            .unwrap();
        assert_eq!(updated["idle_timeout"], json!(60));
        assert_eq!(updated["id"], json!(created.provider_id));

        provider
            .delete(&ctx, "load_balancer", &created.provider_id)
            .unwrap();
        assert_eq!(
            provider
                .read(&ctx, "load_balancer", &created.provider_id)
                .unwrap(),
            None
        );
    }

    #[test]
    fn test_missing_resources() {
        let dir = TempDir::new().unwrap();
        let provider = LocalProvider::new(dir.path(), "us-east-1");
        let id = ResourceId::new("vpc", "main");
        let cancel = CancelToken::new();
        let ctx = ApplyContext::new(&id, &cancel);

        let err = provider.delete(&ctx, "vpc", "vpc-000000000000").unwrap_err();
        assert_eq!(err.category, ErrorCategory::NotFound);

        let err = provider
            .update(&ctx, "vpc", "vpc-000000000000", &Attributes::new())
            .unwrap_err();
        assert_eq!(err.category, ErrorCategory::NotFound);
    }

    #[test]
    fn test_ids_are_unique() {
        let dir = TempDir::new().unwrap();
        let provider = LocalProvider::new(dir.path(), "us-east-1");
        let id = ResourceId::new("subnet", "a");
        let cancel = CancelToken::new();
        let ctx = ApplyContext::new(&id, &cancel);
        let props = attrs(json!({"cidr_block": "10.0.1.0/24"}));

        let first = provider.create(&ctx, "subnet", &props).unwrap();
        let second = provider.create(&ctx, "subnet", &props).unwrap();
        assert_ne!(first.provider_id, second.provider_id);
    }

    #[test]
    fn test_from_settings() {
        let dir = TempDir::new().unwrap();
        let settings = ProviderSettings::default();
        assert_eq!(from_settings(&settings, dir.path()).unwrap().name(), "local");

        let settings = ProviderSettings {
            name: "aws".into(),
            ..ProviderSettings::default()
        };
        assert!(from_settings(&settings, dir.path()).is_err());
    }
}
