//! Recording provider used by the unit tests

use crate::context::ApplyContext;
use crate::error::{ErrorCategory, ProviderError};
use crate::provider::{Created, Provider};
use crate::types::{Attributes, ResourceId};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub struct MockProvider {
    latency: Duration,
    failures: Mutex<HashMap<ResourceId, ProviderError>>,
    delete_failures: Mutex<HashSet<ResourceId>>,
    transient: Mutex<HashMap<ResourceId, u32>>,
    blocking: Mutex<HashSet<ResourceId>>,
    objects: Mutex<HashMap<String, (String, Attributes)>>,
    calls: Mutex<Vec<String>>,
    next_id: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    /// Every call for `id` fails permanently
    pub fn fail(&self, id: ResourceId) {
        self.failures
            .lock()
            .unwrap()
            .insert(id, ProviderError::new(ErrorCategory::Conflict, "rejected"));
    }

    /// Deletes for `id` fail permanently, other calls succeed
    pub fn fail_deletes(&self, id: ResourceId) {
        self.delete_failures.lock().unwrap().insert(id);
    }

    /// Drop every permanent failure set up for `id`
    pub fn recover(&self, id: &ResourceId) {
        self.failures.lock().unwrap().remove(id);
        self.delete_failures.lock().unwrap().remove(id);
    }

    /// The next `times` calls for `id` fail with a transient error
    pub fn fail_transiently(&self, id: ResourceId, times: u32) {
        self.transient.lock().unwrap().insert(id, times);
    }

    /// Calls for `id` block until the run is cancelled
    pub fn block_until_cancelled(&self, id: ResourceId) {
        self.blocking.lock().unwrap().insert(id);
    }

    /// Calls made so far, as "operation kind.name"
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn exists(&self, provider_id: &str) -> bool {
        self.objects.lock().unwrap().contains_key(provider_id)
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    /// Simulate an out-of-band deletion
    pub fn forget(&self, provider_id: &str) {
        self.objects.lock().unwrap().remove(provider_id);
    }

    fn enter(&self, operation: &str, ctx: &ApplyContext) -> Result<(), ProviderError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{operation} {}", ctx.resource));

        if operation == "delete" && self.delete_failures.lock().unwrap().contains(ctx.resource) {
            return Err(ProviderError::new(ErrorCategory::Conflict, "in use"));
        }

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(current, Ordering::SeqCst);
        let outcome = self.simulate(ctx);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }

    fn simulate(&self, ctx: &ApplyContext) -> Result<(), ProviderError> {
        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }

        if self.blocking.lock().unwrap().contains(ctx.resource) {
            let deadline = Instant::now() + Duration::from_secs(5);
            while !ctx.is_cancelled() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(5));
            }
            return Err(ProviderError::cancelled());
        }

        if let Some(err) = self.failures.lock().unwrap().get(ctx.resource) {
            return Err(err.clone());
        }

        let mut transient = self.transient.lock().unwrap();
        if let Some(remaining) = transient.get_mut(ctx.resource)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(ProviderError::transient("throttled"));
        }
        Ok(())
    }
}

impl Provider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn create(
        &self,
        ctx: &ApplyContext,
        kind: &str,
        properties: &Attributes,
    ) -> Result<Created, ProviderError> {
        self.enter("create", ctx)?;
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let provider_id = format!("{kind}-{n}");

        let mut outputs = properties.clone();
        outputs.insert("id".into(), json!(provider_id));
        self.objects
            .lock()
            .unwrap()
            .insert(provider_id.clone(), (kind.to_string(), outputs.clone()));

        Ok(Created {
            provider_id,
            outputs,
        })
    }

    fn read(
        &self,
        ctx: &ApplyContext,
        _kind: &str,
        provider_id: &str,
    ) -> Result<Option<Attributes>, ProviderError> {
        self.enter("read", ctx)?;
        Ok(self
            .objects
            .lock()
            .unwrap()
            .get(provider_id)
            .map(|(_, outputs)| outputs.clone()))
    }

    fn update(
        &self,
        ctx: &ApplyContext,
        kind: &str,
        provider_id: &str,
        properties: &Attributes,
    ) -> Result<Attributes, ProviderError> {
        self.enter("update", ctx)?;
        let mut objects = self.objects.lock().unwrap();
        if !objects.contains_key(provider_id) {
            return Err(ProviderError::not_found(provider_id));
        }
        let mut outputs = properties.clone();
        outputs.insert("id".into(), json!(provider_id));
        objects.insert(provider_id.to_string(), (kind.to_string(), outputs.clone()));
        Ok(outputs)
    }

    fn delete(
        &self,
        ctx: &ApplyContext,
        _kind: &str,
        provider_id: &str,
    ) -> Result<(), ProviderError> {
        self.enter("delete", ctx)?;
        match self.objects.lock().unwrap().remove(provider_id) {
            Some(_) => Ok(()),
            None => Err(ProviderError::not_found(provider_id)),
        }
    }
}
