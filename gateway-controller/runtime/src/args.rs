use crate::{
    index::{self, ClusterInfo, MeshConfig},
    index_list::IndexList,
    issuer::{CaIssuer, NoIssuer},
    k8s::{self, gateway, watcher, Client, Resource},
    lease, repo, status,
};
use anyhow::{bail, Context, Result};
use clap::Parser;
use meshgateway_controller_core::CONTROLLER_NAME;
use prometheus_client::registry::Registry;
use std::{path::PathBuf, sync::Arc};
use tokio::{
    sync::{mpsc, watch},
    time::{self, Duration},
};
use tracing::{info_span, Instrument};

const RECONCILIATION_PERIOD: Duration = Duration::from_secs(10);
const PUBLISH_PERIOD: Duration = Duration::from_secs(3);
const NOT_READY_RETRY: Duration = Duration::from_secs(1);

// The maximum number of status patches to buffer. As a conservative estimate,
// we assume that sending a patch will take at least 1ms, so we set the buffer
// size to be the same as the reconciliation period in milliseconds.
const STATUS_UPDATE_QUEUE_SIZE: usize = RECONCILIATION_PERIOD.as_millis() as usize;

#[derive(Debug, Parser)]
#[clap(name = "gateway-controller", about = "A mesh gateway control plane")]
pub struct Args {
    #[clap(
        long,
        default_value = "meshgateway=info,warn",
        env = "MESHGATEWAY_CONTROLLER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    #[clap(long, default_value = "meshgateway")]
    control_plane_namespace: String,

    #[clap(long, default_value = "meshgateway-controller")]
    controller_deployment_name: String,

    /// The controller name GatewayClasses must reference to be accepted.
    #[clap(long, default_value = CONTROLLER_NAME)]
    controller_name: String,

    #[clap(long, default_value = "meshgateway/proxy:latest")]
    proxy_image: String,

    /// The service type of synthesized gateway Services.
    #[clap(long, default_value = "LoadBalancer")]
    gateway_service_type: String,

    #[clap(long, default_value = "5000")]
    patch_timeout_ms: u64,

    /// Embed semantic names in compiled documents instead of their hashes.
    #[clap(long)]
    pretty_config: bool,

    #[clap(
        long,
        default_value = "http://127.0.0.1:6060",
        env = "MESHGATEWAY_REPO_ADDR"
    )]
    repo_addr: String,

    /// The codebase path under which per-gateway codebases are derived.
    #[clap(long, default_value = "/meshgateway")]
    repo_root: String,

    #[clap(long, default_value = "")]
    plugin_set_version: String,

    #[clap(long, default_value = "error")]
    sidecar_log_level: String,

    /// Connection idle timeout in seconds.
    #[clap(long, default_value = "60")]
    sidecar_timeout: u32,

    #[clap(long)]
    enable_egress: bool,

    /// Issue per-proxy certificates and require mTLS between proxies.
    #[clap(long)]
    enable_mtls: bool,

    #[clap(long, default_value = "86400")]
    certificate_validity_secs: u64,

    #[clap(long)]
    tracing_endpoint: Option<String>,

    #[clap(long)]
    remote_logging_endpoint: Option<String>,

    /// PEM file holding the CA certificate used to sign proxy certificates.
    #[clap(long)]
    ca_cert: Option<PathBuf>,

    /// PEM file holding the CA private key.
    #[clap(long)]
    ca_key: Option<PathBuf>,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            control_plane_namespace,
            controller_deployment_name,
            controller_name,
            proxy_image,
            gateway_service_type,
            patch_timeout_ms,
            pretty_config,
            repo_addr,
            repo_root,
            plugin_set_version,
            sidecar_log_level,
            sidecar_timeout,
            enable_egress,
            enable_mtls,
            certificate_validity_secs,
            tracing_endpoint,
            remote_logging_endpoint,
            ca_cert,
            ca_key,
        } = self;

        let issuer: Arc<dyn index::CertificateIssuer> = match (&ca_cert, &ca_key) {
            (Some(cert), Some(key)) => {
                let cert = std::fs::read_to_string(cert)
                    .with_context(|| format!("reading {}", cert.display()))?;
                let key = std::fs::read_to_string(key)
                    .with_context(|| format!("reading {}", key.display()))?;
                Arc::new(CaIssuer::load(&cert, &key)?)
            }
            _ if enable_mtls => bail!("--enable-mtls requires --ca-cert and --ca-key"),
            _ => Arc::new(NoIssuer),
        };

        let cluster_info = ClusterInfo {
            controller_name: controller_name.clone(),
            pretty_config,
            mesh: MeshConfig {
                sidecar_log_level,
                sidecar_timeout,
                enable_egress,
                mtls: enable_mtls,
                certificate_validity_secs,
                tracing_endpoint,
                remote_logging_endpoint,
                ..MeshConfig::default()
            },
        };

        let mut prom = <Registry>::default();
        let resource_status = prom.sub_registry_with_prefix("resource_status");
        let status_metrics = status::ControllerMetrics::register(resource_status);
        let status_index_metrics = status::IndexMetrics::register(resource_status);
        let compiler_metrics =
            index::IndexMetrics::register(prom.sub_registry_with_prefix("compiler"));
        let publisher_metrics =
            repo::PublisherMetrics::register(prom.sub_registry_with_prefix("repo"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        let hostname =
            std::env::var("HOSTNAME").expect("Failed to fetch `HOSTNAME` environment variable");

        let claims = lease::init(
            &runtime,
            &control_plane_namespace,
            &controller_deployment_name,
            &hostname,
        )
        .await?;

        // Build the status index, which computes and enqueues status patches,
        // and the compiler index, which produces per-proxy documents.
        let (updates_tx, updates_rx) = mpsc::channel(STATUS_UPDATE_QUEUE_SIZE);
        let status_index = status::Index::shared(
            hostname.clone(),
            claims.clone(),
            updates_tx,
            status_index_metrics,
            status::Settings {
                controller_name,
                proxy_image,
                service_type: gateway_service_type,
            },
        );
        let (compiler_index, changed) = index::Index::shared(cluster_info, compiler_metrics);

        // Spawn resource watches.

        let classes = runtime.watch_all::<gateway::GatewayClass>(watcher::Config::default());
        let classes_indexes = IndexList::new(compiler_index.clone())
            .push(status_index.clone())
            .shared();
        tokio::spawn(
            kubert::index::cluster(classes_indexes, classes)
                .instrument(info_span!("gatewayclasses")),
        );

        let gateways = runtime.watch_all::<gateway::Gateway>(watcher::Config::default());
        let gateways_indexes = IndexList::new(compiler_index.clone())
            .push(status_index.clone())
            .shared();
        tokio::spawn(
            kubert::index::namespaced(gateways_indexes, gateways)
                .instrument(info_span!("gateways")),
        );

        macro_rules! watch_route {
            ($ty:ty, $span:expr) => {
                if api_resource_exists::<$ty>(&runtime.client()).await {
                    let routes = runtime.watch_all::<$ty>(watcher::Config::default());
                    let indexes = IndexList::new(compiler_index.clone())
                        .push(status_index.clone())
                        .shared();
                    tokio::spawn(
                        kubert::index::namespaced(indexes, routes).instrument(info_span!($span)),
                    );
                } else {
                    tracing::warn!("{} resource kind not found, skipping watches", $span);
                }
            };
        }

        watch_route!(gateway::HTTPRoute, "httproutes.gateway.networking.k8s.io");
        watch_route!(gateway::GRPCRoute, "grpcroutes.gateway.networking.k8s.io");
        watch_route!(gateway::TCPRoute, "tcproutes.gateway.networking.k8s.io");
        watch_route!(gateway::TLSRoute, "tlsroutes.gateway.networking.k8s.io");
        watch_route!(gateway::UDPRoute, "udproutes.gateway.networking.k8s.io");

        let grants = runtime.watch_all::<gateway::ReferenceGrant>(watcher::Config::default());
        let grants_indexes = IndexList::new(compiler_index.clone())
            .push(status_index.clone())
            .shared();
        tokio::spawn(
            kubert::index::namespaced(grants_indexes, grants)
                .instrument(info_span!("referencegrants")),
        );

        let services = runtime.watch_all::<k8s::Service>(watcher::Config::default());
        let services_indexes = IndexList::new(compiler_index.clone())
            .push(status_index.clone())
            .shared();
        tokio::spawn(
            kubert::index::namespaced(services_indexes, services)
                .instrument(info_span!("services")),
        );

        let slices = runtime.watch_all::<k8s::EndpointSlice>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(compiler_index.clone(), slices)
                .instrument(info_span!("endpointslices")),
        );

        let pods = runtime
            .watch_all::<k8s::Pod>(watcher::Config::default().labels(k8s::GATEWAY_NAME_LABEL));
        tokio::spawn(
            kubert::index::namespaced(compiler_index.clone(), pods).instrument(info_span!("pods")),
        );

        let deployments = runtime.watch_all::<k8s::Deployment>(
            watcher::Config::default().labels(k8s::GATEWAY_NAME_LABEL),
        );
        tokio::spawn(
            kubert::index::namespaced(status_index.clone(), deployments)
                .instrument(info_span!("deployments")),
        );

        let secrets = runtime.watch_all::<k8s::Secret>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(status_index.clone(), secrets)
                .instrument(info_span!("secrets")),
        );

        let configmaps = runtime.watch_all::<k8s::ConfigMap>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(status_index.clone(), configmaps)
                .instrument(info_span!("configmaps")),
        );

        let nodes = runtime.watch_all::<k8s::Node>(watcher::Config::default());
        tokio::spawn(
            kubert::index::cluster(status_index.clone(), nodes).instrument(info_span!("nodes")),
        );

        macro_rules! watch_policy {
            ($ty:ty, $span:expr) => {
                let policies = runtime.watch_all::<$ty>(watcher::Config::default());
                tokio::spawn(
                    kubert::index::namespaced(compiler_index.clone(), policies)
                        .instrument(info_span!($span)),
                );
            };
        }

        watch_policy!(k8s::policy::RetryPolicy, "retrypolicies");
        watch_policy!(k8s::policy::HealthCheckPolicy, "healthcheckpolicies");
        watch_policy!(k8s::policy::BackendLBPolicy, "backendlbpolicies");
        watch_policy!(k8s::policy::BackendTLSPolicy, "backendtlspolicies");
        watch_policy!(k8s::policy::RouteRuleFilterPolicy, "routerulefilterpolicies");
        watch_policy!(k8s::extension::Filter, "filters");
        watch_policy!(k8s::extension::FilterDefinition, "filterdefinitions");
        watch_policy!(k8s::extension::FilterConfig, "filterconfigs");

        // Spawn the status Index reconciliation and the status Controller.
        tokio::spawn(
            status::Index::run(status_index.clone(), RECONCILIATION_PERIOD)
                .instrument(info_span!("status_index")),
        );

        let status_controller = status::Controller::new(
            claims.clone(),
            runtime.client(),
            hostname.clone(),
            updates_rx,
            Duration::from_millis(patch_timeout_ms),
            status_metrics,
        );
        tokio::spawn(
            status_controller
                .run()
                .instrument(info_span!("status_controller")),
        );

        // Spawn the compile-and-publish loop.
        let publisher = repo::Publisher::new(
            repo::HttpRepo::new(reqwest::Client::new(), repo_addr),
            repo_root,
            plugin_set_version,
            publisher_metrics,
        );
        tokio::spawn(
            publish(compiler_index, changed, issuer, publisher, claims, hostname)
                .instrument(info_span!("publisher")),
        );

        // Block the main thread on the shutdown signal. Once it fires, wait
        // for the background tasks to complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}

/// Recompiles and publishes every proxy's document whenever an input changes,
/// and every [`PUBLISH_PERIOD`] so that failed publishes are retried promptly.
async fn publish<R: repo::Repo>(
    index: index::SharedIndex,
    mut changed: watch::Receiver<()>,
    issuer: Arc<dyn index::CertificateIssuer>,
    mut publisher: repo::Publisher<R>,
    claims: watch::Receiver<Arc<kubert::lease::Claim>>,
    hostname: String,
) {
    let mut interval = time::interval(PUBLISH_PERIOD);
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            res = changed.changed() => {
                if res.is_err() {
                    return;
                }
            }
        }

        if !claims.borrow().is_current_for(&hostname) {
            continue;
        }

        let compiled = index.write().compile_all(&*issuer);
        let docs = match compiled {
            Ok(docs) => docs,
            Err(index::CompileError::NotReady(reason)) => {
                tracing::debug!(%reason, "Proxy addresses not ready; deferring publish");
                time::sleep(NOT_READY_RETRY).await;
                changed.mark_changed();
                continue;
            }
            Err(error) => {
                tracing::error!(%error, "Failed to compile configuration");
                continue;
            }
        };

        for (id, doc) in docs {
            if let Err(error) = publisher.publish(id.cn_prefix(), &doc).await {
                tracing::warn!(%error, proxy = %id, "Failed to publish configuration");
            }
        }
    }
}

async fn api_resource_exists<T>(client: &Client) -> bool
where
    T: Resource,
    T::DynamicType: Default,
{
    let dt = Default::default();
    client
        .list_api_group_resources(&T::api_version(&dt))
        .await
        .ok()
        .iter()
        .flat_map(|r| r.resources.iter())
        .any(|r| r.kind == T::kind(&dt))
}
