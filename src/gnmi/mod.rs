//! Ingestion engine A: streaming RPC (gNMI) subscriptions.
//!
//! One worker task per device runs an infinite redial loop: dial (TLS when
//! enabled), open the bidirectional Subscribe stream with credentials as
//! request metadata, receive notifications until error or cancellation,
//! then wait `redial` and dial again. Update decoding failures are reported
//! through the accumulator error path and never terminate the stream.

pub mod decode;
pub mod proto;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use prost::Message;
use tokio_util::sync::CancellationToken;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Identity};
use tracing::{debug, info, warn};

use crate::accumulator::Accumulator;
use crate::config::{GnmiConfig, TlsConfig};
use crate::measure::{SeriesGrouper, Value};
use crate::path::parse_path;

use decode::{Decoded, DecodeError};
use proto::subscribe_response::Response;

/// A running gNMI plugin instance.
pub struct GnmiInput {
    cfg: Arc<GnmiConfig>,
    aliases: Arc<HashMap<String, String>>,
    request: proto::SubscribeRequest,
    workers: Vec<tokio::task::JoinHandle<()>>,
}

impl GnmiInput {
    /// Build the subscribe request and alias table. Configuration errors
    /// surface here, before any worker runs.
    pub fn new(cfg: GnmiConfig) -> Result<Self> {
        if cfg.redial.is_zero() {
            bail!("redial duration must be positive");
        }

        let request = build_request(&cfg)?;
        let aliases = Arc::new(build_aliases(&cfg)?);

        Ok(Self {
            cfg: Arc::new(cfg),
            aliases,
            request,
            workers: Vec::new(),
        })
    }

    /// Spawn one redial worker per device address.
    pub fn start(&mut self, acc: Arc<dyn Accumulator>, cancel: CancellationToken) {
        for address in self.cfg.addresses.clone() {
            let cfg = Arc::clone(&self.cfg);
            let aliases = Arc::clone(&self.aliases);
            let request = self.request.clone();
            let acc = Arc::clone(&acc);
            let cancel = cancel.clone();

            self.workers.push(tokio::spawn(async move {
                run_worker(cfg, aliases, request, address, acc, cancel).await;
            }));
        }

        info!(workers = self.cfg.addresses.len(), "gnmi input started");
    }

    /// Join all workers. The caller cancels the token first.
    pub async fn stop(&mut self) {
        for handle in self.workers.drain(..) {
            let _ = handle.await;
        }
    }
}

async fn run_worker(
    cfg: Arc<GnmiConfig>,
    aliases: Arc<HashMap<String, String>>,
    request: proto::SubscribeRequest,
    address: String,
    acc: Arc<dyn Accumulator>,
    cancel: CancellationToken,
) {
    debug!(device = %address, "gnmi worker started");

    loop {
        if cancel.is_cancelled() {
            break;
        }

        if let Err(e) =
            subscribe_once(&cfg, &aliases, &request, &address, acc.as_ref(), &cancel).await
        {
            if !cancel.is_cancelled() {
                acc.add_error(e);
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(cfg.redial) => {}
        }
    }

    debug!(device = %address, "gnmi worker stopped");
}

/// One dial-subscribe-receive cycle. Returns Ok on clean stream end or
/// cancellation; transport errors bubble to the redial loop.
async fn subscribe_once(
    cfg: &GnmiConfig,
    aliases: &HashMap<String, String>,
    request: &proto::SubscribeRequest,
    address: &str,
    acc: &dyn Accumulator,
    cancel: &CancellationToken,
) -> Result<()> {
    let scheme = if cfg.enable_tls { "https" } else { "http" };
    let mut endpoint =
        Channel::from_shared(format!("{scheme}://{address}")).context("invalid address")?;

    if cfg.enable_tls {
        endpoint = endpoint
            .tls_config(build_tls(&cfg.tls)?)
            .context("building TLS config")?;
    }

    let channel = tokio::select! {
        _ = cancel.cancelled() => return Ok(()),
        conn = endpoint.connect() => {
            conn.with_context(|| format!("failed to dial {address}"))?
        }
    };

    let mut client = proto::client::GnmiClient::new(channel);

    let mut req = tonic::Request::new(tokio_stream::once(request.clone()));
    if !cfg.username.is_empty() {
        req.metadata_mut().insert(
            "username",
            cfg.username.parse().context("username metadata")?,
        );
        req.metadata_mut().insert(
            "password",
            cfg.password.parse().context("password metadata")?,
        );
    }

    let response = tokio::select! {
        _ = cancel.cancelled() => return Ok(()),
        resp = client.subscribe(req) => {
            resp.with_context(|| format!("failed to set up subscription on {address}"))?
        }
    };
    let mut stream = response.into_inner();

    debug!(device = %address, "subscribe stream established");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            msg = stream.message() => match msg {
                Ok(Some(resp)) => handle_response(cfg, aliases, address, resp, acc),
                Ok(None) => return Ok(()),
                Err(status) => {
                    return Err(anyhow!("aborted subscription on {address}: {status}"));
                }
            }
        }
    }
}

fn handle_response(
    cfg: &GnmiConfig,
    aliases: &HashMap<String, String>,
    address: &str,
    response: proto::SubscribeResponse,
    acc: &dyn Accumulator,
) {
    let Some(resp) = response.response else {
        return;
    };

    match resp {
        Response::SyncResponse(done) => {
            debug!(device = %address, done, "sync response");
        }
        Response::Update(notification) => {
            handle_notification(cfg, aliases, address, &notification, &response.extension, acc);
        }
    }
}

fn handle_notification(
    cfg: &GnmiConfig,
    aliases: &HashMap<String, String>,
    address: &str,
    notification: &proto::Notification,
    extensions: &[proto::Extension],
    acc: &dyn Accumulator,
) {
    let timestamp = notification.timestamp;
    let mut prefix_tags: Vec<(String, String)> = Vec::new();

    if cfg.vendor_header {
        decode_vendor_header(extensions, &mut prefix_tags);
    }

    let (prefix, prefix_alias) = match &notification.prefix {
        Some(p) => walk_path(p, "", Some(&mut prefix_tags), aliases, cfg.long_tag),
        None => (String::new(), String::new()),
    };

    upsert_tag(&mut prefix_tags, "device", host_part(address));
    upsert_tag(&mut prefix_tags, "path", prefix.clone());

    let mut grouper = SeriesGrouper::new();
    let mut last_alias: Option<String> = None;
    let mut name = String::new();

    for update in &notification.update {
        let mut tags = prefix_tags.clone();
        let (mut alias_path, fields) = handle_field(cfg, aliases, update, &mut tags, &prefix, acc);

        // Inherit a valid alias from prefix parsing.
        if alias_path.is_empty() && !prefix_alias.is_empty() {
            alias_path = prefix_alias.clone();
        }

        // Only re-resolve the measurement name when the alias path changes.
        if last_alias.as_deref() != Some(alias_path.as_str()) {
            name = match aliases.get(&alias_path) {
                Some(alias) => alias.clone(),
                None => {
                    debug!(path = %prefix, "no measurement alias for path");
                    prefix.clone()
                }
            };
        }

        for (key, value) in fields {
            let field_key = if cfg.long_field {
                key
            } else {
                match shorten_field_key(&key, &alias_path) {
                    Some(short) => short,
                    None => {
                        warn!(key = %key, "invalid empty field path");
                        continue;
                    }
                }
            };
            grouper.add(&name, &tags, timestamp, field_key, value);
        }

        last_alias = Some(alias_path);
    }

    for m in grouper.into_measurements() {
        acc.add_measurement(m);
    }
}

fn decode_vendor_header(extensions: &[proto::Extension], tags: &mut Vec<(String, String)>) {
    let Some(proto::extension::Ext::RegisteredExt(reg)) =
        extensions.first().and_then(|e| e.ext.as_ref())
    else {
        return;
    };

    match proto::TelemetryHeader::decode(reg.msg.as_slice()) {
        Ok(header) => {
            upsert_tag(tags, "_component_id", header.component_id.to_string());
            upsert_tag(tags, "component", header.component);
            upsert_tag(tags, "_subcomponent_id", header.sub_component_id.to_string());
        }
        Err(e) => debug!(error = %e, "vendor header decode failed"),
    }
}

/// Decode one update into `(alias_path, fields)`.
///
/// Decoding failures never abort the stream: JSON errors go to the
/// accumulator, a bad bytes length keeps the raw bytes, an unset value is
/// discarded with a log line.
fn handle_field(
    cfg: &GnmiConfig,
    aliases: &HashMap<String, String>,
    update: &proto::Update,
    tags: &mut Vec<(String, String)>,
    prefix: &str,
    acc: &dyn Accumulator,
) -> (String, Vec<(String, Value)>) {
    let (gpath, alias_path) = match &update.path {
        Some(p) => walk_path(p, prefix, Some(tags), aliases, cfg.long_tag),
        None => (prefix.to_string(), String::new()),
    };

    let Some(val) = &update.val else {
        debug!(path = %gpath, "discarded empty value");
        return (alias_path, Vec::new());
    };

    match decode::decode_value(val, cfg.bytes_to_float) {
        Ok(Decoded::Scalar(value)) => (alias_path, vec![(gpath, value)]),
        Ok(Decoded::Json(doc)) => {
            let mut fields = Vec::new();
            decode::flatten_json(&gpath, &doc, &mut fields);
            (alias_path, fields)
        }
        Err(DecodeError::Empty) => {
            debug!(path = %gpath, "discarded empty value");
            (alias_path, Vec::new())
        }
        Err(e @ DecodeError::BadFloatLength(_)) => {
            warn!(path = %gpath, error = %e, "unable to convert bytes to float");
            match &val.value {
                Some(proto::typed_value::Value::BytesVal(b)) => {
                    (alias_path, vec![(gpath, Value::Bytes(b.clone()))])
                }
                _ => (alias_path, Vec::new()),
            }
        }
        Err(e) => {
            acc.add_error(anyhow!(e).context(format!("failed to parse value at {gpath}")));
            (alias_path, Vec::new())
        }
    }
}

/// Walk a wire path, extending `prefix` with element names, collecting
/// predicate keys into tags, and tracking the longest alias match.
fn walk_path(
    path: &proto::Path,
    prefix: &str,
    mut tags: Option<&mut Vec<(String, String)>>,
    aliases: &HashMap<String, String>,
    long_tag: bool,
) -> (String, String) {
    let mut builder = String::from(prefix);
    if !path.origin.is_empty() {
        builder.push_str(&path.origin);
        builder.push(':');
    }

    let mut alias_path = String::new();

    for elem in &path.elem {
        if !elem.name.is_empty() {
            builder.push('/');
            builder.push_str(&elem.name);
        }

        if aliases.contains_key(builder.as_str()) {
            alias_path = builder.clone();
        }

        if let Some(tags) = tags.as_mut() {
            for (key, val) in &elem.key {
                if long_tag {
                    upsert_tag(tags, format!("{builder}/{key}"), val.clone());
                } else if tags.iter().any(|(k, _)| k == key) {
                    // Short form collides with an existing tag.
                    upsert_tag(tags, format!("{builder}/{key}"), val.clone());
                } else {
                    upsert_tag(tags, key.clone(), val.clone());
                }
            }
        }
    }

    (builder, alias_path)
}

/// Shorten a field key relative to the alias path: strict prefix is
/// stripped, anything else reduces to the last path element. Returns None
/// when nothing remains.
fn shorten_field_key(key: &str, alias_path: &str) -> Option<String> {
    let short = if !alias_path.is_empty()
        && key.len() > alias_path.len()
        && key.starts_with(alias_path)
        && key.as_bytes()[alias_path.len()] == b'/'
    {
        &key[alias_path.len() + 1..]
    } else {
        key.rsplit('/').next().unwrap_or(key)
    };

    let short = short.trim_start_matches(['/', '.']);
    if short.is_empty() {
        None
    } else {
        Some(short.to_string())
    }
}

fn upsert_tag(tags: &mut Vec<(String, String)>, key: impl Into<String>, value: String) {
    let key = key.into();
    if let Some(slot) = tags.iter_mut().find(|(k, _)| *k == key) {
        slot.1 = value;
    } else {
        tags.push((key, value));
    }
}

/// Host portion of a dial address, with IPv6 brackets handled.
fn host_part(address: &str) -> String {
    if let Some(rest) = address.strip_prefix('[') {
        if let Some(end) = rest.find(']') {
            return rest[..end].to_string();
        }
    }

    match address.rsplit_once(':') {
        Some((host, port))
            if !host.contains(':') && port.chars().all(|c| c.is_ascii_digit()) =>
        {
            host.to_string()
        }
        _ => address.to_string(),
    }
}

fn build_request(cfg: &GnmiConfig) -> Result<proto::SubscribeRequest> {
    let mut subscriptions = Vec::with_capacity(cfg.subscriptions.len());

    for sub in &cfg.subscriptions {
        let parsed = parse_path(&sub.origin, &sub.path, "")
            .with_context(|| format!("invalid subscription path {:?}", sub.path))?;

        let mode = match sub.mode.as_str() {
            "target_defined" => proto::SubscriptionMode::TargetDefined,
            "on_change" => proto::SubscriptionMode::OnChange,
            "sample" => proto::SubscriptionMode::Sample,
            other => bail!("invalid subscription mode {other:?}"),
        };

        subscriptions.push(proto::Subscription {
            path: Some(to_proto(&parsed)),
            mode: mode as i32,
            sample_interval: sub.sample_interval.as_nanos() as u64,
            suppress_redundant: sub.suppress_redundant,
            heartbeat_interval: sub.heartbeat_interval.as_nanos() as u64,
        });
    }

    let prefix = parse_path(&cfg.origin, &cfg.prefix, &cfg.target).context("invalid prefix")?;

    let encoding = match cfg.encoding.as_str() {
        "proto" => proto::Encoding::Proto,
        "json" => proto::Encoding::Json,
        "json_ietf" => proto::Encoding::JsonIetf,
        "bytes" => proto::Encoding::Bytes,
        other => bail!("unsupported encoding {other:?}"),
    };

    Ok(proto::SubscribeRequest {
        request: Some(proto::subscribe_request::Request::Subscribe(
            proto::SubscriptionList {
                prefix: Some(to_proto(&prefix)),
                subscription: subscriptions,
                mode: proto::subscription_list::Mode::Stream as i32,
                encoding: encoding as i32,
                updates_only: cfg.updates_only,
            },
        )),
    })
}

/// Invert the explicit alias list and prefill subscription names keyed by
/// both the long (origin-qualified) and short path forms.
fn build_aliases(cfg: &GnmiConfig) -> Result<HashMap<String, String>> {
    let mut aliases = HashMap::new();

    for sub in &cfg.subscriptions {
        let long = path_names(&parse_path(&sub.origin, &sub.path, "")?);
        let short = path_names(&parse_path("", &sub.path, "")?);

        let name = if sub.name.is_empty() {
            short.rsplit('/').next().unwrap_or("").to_string()
        } else {
            sub.name.clone()
        };

        if !name.is_empty() {
            aliases.insert(long, name.clone());
            aliases.insert(short, name);
        }
    }

    for (alias, paths) in &cfg.aliases {
        for path in paths {
            aliases.insert(path.clone(), alias.clone());
        }
    }

    Ok(aliases)
}

/// Name-only string form of a parsed path; predicate keys are dropped, as
/// they become tags rather than part of the alias key.
fn path_names(path: &crate::path::Path) -> String {
    let mut s = String::new();
    if !path.origin.is_empty() {
        s.push_str(&path.origin);
        s.push(':');
    }
    for elem in &path.elems {
        s.push('/');
        s.push_str(&elem.name);
    }
    s
}

fn to_proto(path: &crate::path::Path) -> proto::Path {
    proto::Path {
        element: path.elems.iter().map(|e| e.name.clone()).collect(),
        origin: path.origin.clone(),
        elem: path
            .elems
            .iter()
            .map(|e| proto::PathElem {
                name: e.name.clone(),
                key: e.keys.iter().cloned().collect(),
            })
            .collect(),
        target: path.target.clone(),
    }
}

fn build_tls(tls: &TlsConfig) -> Result<ClientTlsConfig> {
    let mut cfg = ClientTlsConfig::new();

    if !tls.ca_file.is_empty() {
        let pem = std::fs::read(&tls.ca_file)
            .with_context(|| format!("reading CA file {}", tls.ca_file))?;
        cfg = cfg.ca_certificate(Certificate::from_pem(pem));
    }

    if !tls.cert_file.is_empty() && !tls.key_file.is_empty() {
        let cert = std::fs::read(&tls.cert_file)
            .with_context(|| format!("reading cert file {}", tls.cert_file))?;
        let key = std::fs::read(&tls.key_file)
            .with_context(|| format!("reading key file {}", tls.key_file))?;
        cfg = cfg.identity(Identity::from_pem(cert, key));
    }

    if tls.insecure_skip_verify {
        warn!("insecure_skip_verify is not supported by the rustls transport; peer verification stays enabled");
    }

    Ok(cfg)
}
