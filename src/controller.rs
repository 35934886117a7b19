use std::collections::HashSet;
use std::sync::Arc;

use futures_util::StreamExt;
use k8s_openapi::api::core::v1::{Endpoints, Service};
use k8s_openapi::api::networking::v1::Ingress as NetIngress;
use kube::runtime::watcher;
use kube::{Api, ResourceExt};
use tokio::sync::watch;

use crate::cache::ResourceCache;
use crate::error::Error;
use crate::events::{self, class_matches, DeleteObj, Delivery};
use crate::model::{resource_key, Backend, IngressDef, IngressEx};
use crate::nginx::NginxState;
use crate::queue::{Task, TaskKind, TaskQueue};

/// Orchestrates C4-C6, and implements `sync`, closing the loop into
/// C3 -> C2 -> C1 (spec.md §2, §4.7). No direct teacher precedent: the
/// teacher delegates this entirely to `kube::runtime::Controller`; this
/// hand-rolls the informer/cache/queue wiring the spec requires, reusing
/// the teacher's `Api`/`watcher` primitives at the leaves.
pub struct ReconcileEngine {
    cache: Arc<ResourceCache>,
    queue: Arc<TaskQueue>,
    ingress_class: String,
}

impl ReconcileEngine {
    pub fn new(cache: Arc<ResourceCache>, queue: Arc<TaskQueue>, ingress_class: String) -> Self {
        ReconcileEngine { cache, queue, ingress_class }
    }

    /// The three informer tasks run in parallel, each owning exclusive write
    /// access to its kind's store (spec.md §5).
    pub async fn run_informers(&self, client: kube::Client, namespace: &str, mut stop: watch::Receiver<bool>) {
        let ingress_api: Api<NetIngress> = Api::namespaced(client.clone(), namespace);
        let service_api: Api<Service> = Api::namespaced(client.clone(), namespace);
        let endpoints_api: Api<Endpoints> = Api::namespaced(client.clone(), namespace);

        let ingress_fut = self.run_ingress_informer(ingress_api, stop.clone());
        let service_fut = self.run_service_informer(service_api, stop.clone());
        let endpoints_fut = self.run_endpoints_informer(endpoints_api, stop.clone());

        tokio::select! {
            _ = ingress_fut => {}
            _ = service_fut => {}
            _ = endpoints_fut => {}
            _ = stop.changed() => {}
        }
    }

    async fn run_ingress_informer(&self, api: Api<NetIngress>, mut stop: watch::Receiver<bool>) {
        let mut stream = watcher(api, watcher::Config::default()).boxed();
        loop {
            tokio::select! {
                _ = stop.changed() => return,
                next = stream.next() => {
                    match next {
                        None => return,
                        Some(Ok(event)) => self.handle_ingress_event(event).await,
                        Some(Err(err)) => log::warn!("ingress watch error: {err}"),
                    }
                }
            }
        }
    }

    async fn run_service_informer(&self, api: Api<Service>, mut stop: watch::Receiver<bool>) {
        let mut stream = watcher(api, watcher::Config::default()).boxed();
        loop {
            tokio::select! {
                _ = stop.changed() => return,
                next = stream.next() => {
                    match next {
                        None => return,
                        Some(Ok(event)) => self.handle_service_event(event).await,
                        Some(Err(err)) => log::warn!("service watch error: {err}"),
                    }
                }
            }
        }
    }

    async fn run_endpoints_informer(&self, api: Api<Endpoints>, mut stop: watch::Receiver<bool>) {
        let mut stream = watcher(api, watcher::Config::default()).boxed();
        loop {
            tokio::select! {
                _ = stop.changed() => return,
                next = stream.next() => {
                    match next {
                        None => return,
                        Some(Ok(event)) => self.handle_endpoints_event(event).await,
                        Some(Err(err)) => log::warn!("endpoints watch error: {err}"),
                    }
                }
            }
        }
    }

    async fn handle_ingress_event(&self, event: watcher::Event<NetIngress>) {
        match event {
            watcher::Event::Applied(obj) => {
                let key = key_of(&obj);
                let obj = Arc::new(obj);
                let prior = self.cache.ingresses.insert(key, obj.clone());
                let delivery = match prior {
                    None => Delivery::Add(obj),
                    Some(old) => Delivery::Update { old, new: obj },
                };
                self.dispatch_ingress(&delivery).await;
            }
            watcher::Event::Deleted(obj) => {
                let key = key_of(&obj);
                self.cache.ingresses.remove(&key);
                let delivery = Delivery::Delete(DeleteObj::Observed(Arc::new(obj)));
                self.dispatch_ingress(&delivery).await;
            }
            watcher::Event::Restarted(objs) => {
                self.reconcile_restart_ingress(objs).await;
            }
        }
    }

    async fn dispatch_ingress(&self, delivery: &Delivery<NetIngress>) {
        if let Some(task) = events::ingress::classify(delivery, &self.ingress_class) {
            self.queue.enqueue(task).await;
        }
    }

    /// A relist can drop cache entries without ever delivering an explicit
    /// `Deleted` event; reconstructing those as tombstones is the real
    /// analogue of the source's `DeletedFinalStateUnknown` (spec.md §8
    /// "Tombstone unwrapping").
    async fn reconcile_restart_ingress(&self, objs: Vec<NetIngress>) {
        let new_keys: HashSet<String> = objs.iter().map(key_of).collect();
        for stale_key in self.cache.ingresses.keys() {
            if new_keys.contains(&stale_key) {
                continue;
            }
            if let Some(old) = self.cache.ingresses.remove(&stale_key) {
                let delivery = Delivery::Delete(DeleteObj::Tombstone(old));
                self.dispatch_ingress(&delivery).await;
            }
        }
        for obj in objs {
            let key = key_of(&obj);
            let obj = Arc::new(obj);
            let prior = self.cache.ingresses.insert(key, obj.clone());
            let delivery = match prior {
                None => Delivery::Add(obj),
                Some(old) => Delivery::Update { old, new: obj },
            };
            self.dispatch_ingress(&delivery).await;
        }
    }

    async fn handle_service_event(&self, event: watcher::Event<Service>) {
        match event {
            watcher::Event::Applied(obj) => {
                let key = resource_key(&obj.namespace().unwrap_or_default(), &obj.name_any());
                let obj = Arc::new(obj);
                let prior = self.cache.services.insert(key, obj.clone());
                let delivery = match prior {
                    None => Delivery::Add(obj),
                    Some(old) => Delivery::Update { old, new: obj },
                };
                self.dispatch_service(&delivery).await;
            }
            watcher::Event::Deleted(obj) => {
                let key = resource_key(&obj.namespace().unwrap_or_default(), &obj.name_any());
                self.cache.services.remove(&key);
                let delivery = Delivery::Delete(DeleteObj::Observed(Arc::new(obj)));
                self.dispatch_service(&delivery).await;
            }
            watcher::Event::Restarted(objs) => {
                let new_keys: HashSet<String> = objs
                    .iter()
                    .map(|s| resource_key(&s.namespace().unwrap_or_default(), &s.name_any()))
                    .collect();
                for stale_key in self.cache.services.keys() {
                    if new_keys.contains(&stale_key) {
                        continue;
                    }
                    if let Some(old) = self.cache.services.remove(&stale_key) {
                        let delivery = Delivery::Delete(DeleteObj::Tombstone(old));
                        self.dispatch_service(&delivery).await;
                    }
                }
                for obj in objs {
                    let key = resource_key(&obj.namespace().unwrap_or_default(), &obj.name_any());
                    let obj = Arc::new(obj);
                    let prior = self.cache.services.insert(key, obj.clone());
                    let delivery = match prior {
                        None => Delivery::Add(obj),
                        Some(old) => Delivery::Update { old, new: obj },
                    };
                    self.dispatch_service(&delivery).await;
                }
            }
        }
    }

    async fn dispatch_service(&self, delivery: &Delivery<Service>) {
        for task in events::service::enqueue_tasks(delivery, &self.cache) {
            self.queue.enqueue(task).await;
        }
    }

    async fn handle_endpoints_event(&self, event: watcher::Event<Endpoints>) {
        match event {
            watcher::Event::Applied(obj) => {
                let key = resource_key(&obj.namespace().unwrap_or_default(), &obj.name_any());
                let obj = Arc::new(obj);
                let prior = self.cache.endpoints.insert(key, obj.clone());
                let delivery = match prior {
                    None => Delivery::Add(obj),
                    Some(old) => Delivery::Update { old, new: obj },
                };
                self.dispatch_endpoints(&delivery).await;
            }
            watcher::Event::Deleted(obj) => {
                let key = resource_key(&obj.namespace().unwrap_or_default(), &obj.name_any());
                self.cache.endpoints.remove(&key);
                let delivery = Delivery::Delete(DeleteObj::Observed(Arc::new(obj)));
                self.dispatch_endpoints(&delivery).await;
            }
            watcher::Event::Restarted(objs) => {
                let new_keys: HashSet<String> = objs
                    .iter()
                    .map(|e| resource_key(&e.namespace().unwrap_or_default(), &e.name_any()))
                    .collect();
                for stale_key in self.cache.endpoints.keys() {
                    if new_keys.contains(&stale_key) {
                        continue;
                    }
                    if let Some(old) = self.cache.endpoints.remove(&stale_key) {
                        let delivery = Delivery::Delete(DeleteObj::Tombstone(old));
                        self.dispatch_endpoints(&delivery).await;
                    }
                }
                for obj in objs {
                    let key = resource_key(&obj.namespace().unwrap_or_default(), &obj.name_any());
                    let obj = Arc::new(obj);
                    let prior = self.cache.endpoints.insert(key, obj.clone());
                    let delivery = match prior {
                        None => Delivery::Add(obj),
                        Some(old) => Delivery::Update { old, new: obj },
                    };
                    self.dispatch_endpoints(&delivery).await;
                }
            }
        }
    }

    async fn dispatch_endpoints(&self, delivery: &Delivery<Endpoints>) {
        if let Some(task) = events::endpoints::classify(delivery) {
            self.queue.enqueue(task).await;
        }
    }

    /// The single-threaded reconciliation worker: draws tasks one at a
    /// time and invokes `sync`, so config generation, file I/O, and proxy
    /// reload never run concurrently (spec.md §5). A fatal `sync` error
    /// (file I/O, spec.md §7) or an unexpected proxy exit ends the worker
    /// with `Err` rather than being logged and dropped, so the caller can
    /// map it to exit code 1 (in `local` mode the proxy-exit branch never
    /// fires, since `ProxyController::wait` stays pending forever without
    /// a child).
    pub async fn run_worker(&self, nginx: &mut NginxState, mut stop: watch::Receiver<bool>) -> Result<(), Error> {
        loop {
            enum Woken {
                Stopped,
                ProxyExited(Result<std::process::ExitStatus, Error>),
                Task(Option<Task>),
            }

            let woken = tokio::select! {
                _ = stop.changed() => Woken::Stopped,
                status = nginx.proxy_mut().wait() => Woken::ProxyExited(status),
                task = self.queue.next() => Woken::Task(task),
            };

            let task = match woken {
                Woken::Stopped => {
                    self.queue.shutdown().await;
                    return Ok(());
                }
                Woken::ProxyExited(status) => {
                    let status = status?;
                    return Err(anyhow::anyhow!("nginx exited unexpectedly: {status:?}").into());
                }
                Woken::Task(task) => task,
            };
            let Some(task) = task else { return Ok(()) };

            let result = match task.kind {
                TaskKind::Ingress => self.sync_ingress(nginx, &task.key).await,
                TaskKind::Endpoints => self.sync_endpoints(nginx, &task.key).await,
            };

            if let Err(err) = result {
                if err.is_fatal() {
                    return Err(err);
                } else if err.is_retryable() {
                    log::warn!("task {task:?} failed, retrying: {err}");
                    self.queue.requeue(task).await;
                } else {
                    log::warn!("task {task:?} failed, dropping: {err}");
                }
            }
        }
    }

    /// spec.md §4.7 `syncIngress`.
    async fn sync_ingress(&self, nginx: &mut NginxState, key: &str) -> Result<(), Error> {
        let Some(ing_obj) = self.cache.ingresses.get_by_key(key) else {
            if nginx.has_ingress(key) {
                nginx.delete_ingress(key).await?;
            }
            return Ok(());
        };

        let ingress_def = IngressDef::from_k8s(&ing_obj)?;
        let ing_ex = self.build_ingress_ex(ingress_def).await?;

        if !ing_ex.ingress.has_valid_rules() {
            log::warn!("ingress {key} has no valid rules, dropping");
            return Err(Error::NoValidRules);
        }

        nginx.add_or_update_ingress(ing_ex).await?;
        Ok(())
    }

    /// spec.md §4.7 `syncEndpoints`.
    async fn sync_endpoints(&self, nginx: &mut NginxState, key: &str) -> Result<(), Error> {
        if self.cache.endpoints.get_by_key(key).is_none() {
            return Ok(());
        }

        let mut ing_exes = Vec::new();
        for ing_obj in self.cache.ingresses_by_endpoints_key(key) {
            let ingress_def = IngressDef::from_k8s(&ing_obj)?;
            if !class_matches(Some(&ingress_def.annotations), &self.ingress_class) {
                continue;
            }
            if !nginx.has_ingress(&ingress_def.key()) {
                continue;
            }
            ing_exes.push(self.build_ingress_ex(ingress_def).await?);
        }

        nginx.update_endpoints(ing_exes).await?;
        Ok(())
    }

    /// For the default backend and each rule path, resolves endpoints via
    /// C4. A non-transient resolution failure degrades that single backend
    /// to an empty list without failing the whole reconcile (spec.md §4.7
    /// step 2).
    async fn build_ingress_ex(&self, ingress_def: IngressDef) -> Result<IngressEx, Error> {
        let namespace = ingress_def.namespace.clone();
        let mut backends: Vec<Backend> = Vec::new();
        if let Some(b) = &ingress_def.default_backend {
            backends.push(b.clone());
        }
        for rule in &ingress_def.rules {
            for path in &rule.paths {
                backends.push(path.backend.clone());
            }
        }

        let mut ing_ex = IngressEx::new(ingress_def);
        for backend in backends {
            match self.cache.resolve_backend_endpoints(&namespace, &backend).await {
                Ok(endpoints) => {
                    ing_ex.endpoints.insert(backend.endpoints_key(), endpoints);
                }
                Err(err) if err.is_transient() => return Err(Error::Resolve(err)),
                Err(err) => {
                    log::warn!(
                        "backend {} on {} degraded to empty endpoint list: {err}",
                        backend.service_name,
                        namespace
                    );
                }
            }
        }
        Ok(ing_ex)
    }
}

fn key_of(ing: &NetIngress) -> String {
    resource_key(&ing.namespace().unwrap_or_default(), &ing.name_any())
}
