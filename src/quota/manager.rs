// src/quota/manager.rs

//! Shared admission accounting over a capacity [`Quota`].

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use super::Quota;

/// Result of an admission attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Granted,
    /// Denied; names the first resource that did not fit.
    Denied { resource: String },
}

impl Admission {
    pub fn is_granted(&self) -> bool {
        matches!(self, Admission::Granted)
    }
}

/// Best-effort probe of live backend-reported usage, keyed off whatever
/// label convention the backend uses for this pool.
///
/// On failure the manager degrades to treating usage as zero rather than
/// refusing admission, warning once per distinct failing condition.
pub type UsageProbe =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = anyhow::Result<Quota>> + Send>> + Send + Sync>;

struct ManagerState {
    /// Cached consumption ledger. `None` means cold: the next observation
    /// refreshes from the probe (or from zero when no probe is configured).
    consumed: Option<Quota>,
    /// Conditions already warned about, to avoid log storms.
    warned: HashSet<String>,
}

/// Tracks consumable capacity for a shared resource pool and grants or
/// denies admission.
///
/// One manager may be shared by several tasks/executors drawing from the
/// same pool; all mutation is serialized through `reserve`/`release`.
///
/// Known approximation: consumption starts from zero (or from a lazy probe
/// refresh) on a cold start, so jobs launched by this process briefly
/// double-count against jobs already running from a prior process
/// generation, until the next `invalidate` + probe refresh.
pub struct QuotaManager {
    capacity: Quota,
    probe: Option<UsageProbe>,
    state: Mutex<ManagerState>,
}

impl std::fmt::Debug for QuotaManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotaManager")
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl QuotaManager {
    pub fn new(capacity: Quota) -> Arc<Self> {
        Arc::new(Self {
            capacity,
            probe: None,
            state: Mutex::new(ManagerState {
                consumed: Some(Quota::new()),
                warned: HashSet::new(),
            }),
        })
    }

    /// A manager that reconciles its consumption ledger against live
    /// backend-reported usage on a cold start or after `invalidate`.
    pub fn with_probe(capacity: Quota, probe: UsageProbe) -> Arc<Self> {
        Arc::new(Self {
            capacity,
            probe: Some(probe),
            state: Mutex::new(ManagerState {
                consumed: None,
                warned: HashSet::new(),
            }),
        })
    }

    pub fn capacity(&self) -> &Quota {
        &self.capacity
    }

    /// Current consumption, refreshing the cache through the probe if cold.
    pub async fn usage(&self) -> Quota {
        self.ensure_loaded().await;
        self.state
            .lock()
            .unwrap()
            .consumed
            .clone()
            .unwrap_or_default()
    }

    /// Drop the cached ledger; the next observation refreshes it.
    pub fn invalidate(&self) {
        self.state.lock().unwrap().consumed = None;
    }

    /// Atomically check whether `consumed + requested <= capacity`; if so,
    /// add `requested` to `consumed` and grant. Denial leaves state
    /// untouched — callers must not retry within the same tick.
    pub async fn reserve(&self, requested: &Quota) -> Admission {
        self.ensure_loaded().await;

        let mut state = self.state.lock().unwrap();
        let consumed = state.consumed.clone().unwrap_or_default();
        let would_be = consumed.add(requested);
        match would_be.exceeded_resource(&self.capacity) {
            None => {
                debug!(requested = %requested, consumed = %would_be, "quota reserved");
                state.consumed = Some(would_be);
                Admission::Granted
            }
            Some(resource) => Admission::Denied {
                resource: resource.to_string(),
            },
        }
    }

    /// Subtract `amount` from `consumed`, floored at zero.
    ///
    /// A double-release is a logic error upstream; it is reported once per
    /// underflowing resource and clamped rather than corrupting subsequent
    /// admission decisions.
    pub fn release(&self, amount: &Quota) {
        let mut state = self.state.lock().unwrap();
        let consumed = match state.consumed.clone() {
            Some(c) => c,
            // Cold cache: nothing to subtract from; the next refresh
            // re-derives usage anyway.
            None => return,
        };
        let (next, underflowed) = consumed.sub_clamped(amount);
        for resource in underflowed {
            let key = format!("release-underflow:{resource}");
            if state.warned.insert(key) {
                warn!(
                    resource = %resource,
                    "quota release underflow; clamping at zero (double release?)"
                );
            }
        }
        state.consumed = Some(next);
    }

    async fn ensure_loaded(&self) {
        let cold = self.state.lock().unwrap().consumed.is_none();
        if !cold {
            return;
        }

        let loaded = match &self.probe {
            Some(probe) => match probe().await {
                Ok(usage) => {
                    info!(usage = %usage, "quota ledger refreshed from backend");
                    usage
                }
                Err(err) => {
                    // Degrade to zero usage instead of failing admission
                    // entirely; warn once per distinct failing condition.
                    let key = format!("probe:{err}");
                    let mut state = self.state.lock().unwrap();
                    if state.warned.insert(key) {
                        warn!(error = %err, "usage probe failed; treating usage as zero");
                    }
                    drop(state);
                    Quota::new()
                }
            },
            None => Quota::new(),
        };

        let mut state = self.state.lock().unwrap();
        // Another caller may have raced the refresh; keep theirs.
        if state.consumed.is_none() {
            state.consumed = Some(loaded);
        }
    }
}
