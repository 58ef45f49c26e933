//! Live sessions and master volume through PipeWire
//!
//! Application sessions are `Stream/Output/Audio` nodes; the master volume is
//! the `channelVolumes` property of the default `Audio/Sink` node, as named by
//! the `default` metadata object. PipeWire channel volumes are linear gains,
//! converted to the perceptual scalar the rest of the crate works with.

use super::{linear_from_scalar, scalar_from_linear, AudioBackend, AudioConnection};
use crate::error::EndpointError;
use crate::models::LiveSession;
use log::{debug, trace, warn};
use pipewire as pw;
use pw::proxy::ProxyT;
use pw::spa;
use pw::spa::pod::deserialize::PodDeserializer;
use pw::spa::pod::{Pod, Property, PropertyFlags, Value, ValueArray};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

const STREAM_OUTPUT_CLASS: &str = "Stream/Output/Audio";
const SINK_CLASS: &str = "Audio/Sink";
const DEFAULT_SINK_KEY: &str = "default.audio.sink";

/// Opens PipeWire connections on the calling thread
#[derive(Debug, Clone, Copy, Default)]
pub struct PipeWireBackend;

impl PipeWireBackend {
    pub fn new() -> Self {
        Self
    }
}

impl AudioBackend for PipeWireBackend {
    type Connection = PipeWireConnection;

    fn connect(&self) -> Result<PipeWireConnection, EndpointError> {
        PipeWireConnection::open()
    }
}

/// A node we care about, as announced by the registry
#[derive(Debug, Clone)]
struct NodeEntry {
    media_class: String,
    node_name: Option<String>,
    identity: Option<String>,
    /// Client-side id of our bound proxy; core errors name this, not the global id
    proxy_id: u32,
    /// Linear channel volumes from the last Props read
    channel_volumes: Vec<f32>,
}

#[derive(Default)]
struct Graph {
    nodes: BTreeMap<u32, NodeEntry>,
    proxies: BTreeMap<u32, pw::node::Node>,
    node_listeners: Vec<pw::node::NodeListener>,
    metadata: Vec<(pw::metadata::Metadata, pw::metadata::MetadataListener)>,
    default_sink: Option<String>,
}

/// One PipeWire session, released on drop
pub struct PipeWireConnection {
    mainloop: pw::main_loop::MainLoopRc,
    _context: pw::context::ContextRc,
    core: pw::core::CoreRc,
    registry: pw::registry::RegistryRc,
    graph: Rc<RefCell<Graph>>,
    last_error: Rc<RefCell<Option<(u32, String)>>>,
    _core_listener: pw::core::Listener,
}

impl PipeWireConnection {
    fn open() -> Result<Self, EndpointError> {
        pw::init();

        let mainloop = pw::main_loop::MainLoopRc::new(None)
            .map_err(|e| EndpointError::Backend(format!("Failed to create PipeWire main loop: {}", e)))?;

        let context = pw::context::ContextRc::new(&mainloop, None)
            .map_err(|e| EndpointError::Backend(format!("Failed to create PipeWire context: {}", e)))?;

        let core = context.connect_rc(None).map_err(|e| {
            EndpointError::PermissionDenied(format!("Failed to connect to PipeWire: {}", e))
        })?;

        let registry = core.get_registry_rc().map_err(|e| {
            EndpointError::PermissionDenied(format!("Failed to get PipeWire registry: {}", e))
        })?;

        let last_error = Rc::new(RefCell::new(None));
        let error_sink = last_error.clone();
        let core_listener = core
            .add_listener_local()
            .error(move |id, _seq, _res, message| {
                warn!("PipeWire error on object {}: {}", id, message);
                *error_sink.borrow_mut() = Some((id, message.to_string()));
            })
            .register();

        debug!("Connected to PipeWire");

        Ok(Self {
            mainloop,
            _context: context,
            core,
            registry,
            graph: Rc::new(RefCell::new(Graph::default())),
            last_error,
            _core_listener: core_listener,
        })
    }

    /// Block until the server has processed everything sent so far
    fn roundtrip(&self) -> Result<(), EndpointError> {
        let done = Rc::new(Cell::new(false));
        let pending = self
            .core
            .sync(0)
            .map_err(|e| EndpointError::Backend(format!("PipeWire sync failed: {}", e)))?;

        let done_flag = done.clone();
        let mainloop_weak = self.mainloop.downgrade();
        let _listener = self
            .core
            .add_listener_local()
            .done(move |id, seq| {
                if id == pw::core::PW_ID_CORE && seq == pending {
                    done_flag.set(true);
                    if let Some(mainloop) = mainloop_weak.upgrade() {
                        mainloop.quit();
                    }
                }
            })
            .register();

        while !done.get() {
            self.mainloop.run();
        }
        Ok(())
    }

    /// Rebuild the node table from scratch and read every node's volumes
    fn refresh(&mut self) -> Result<(), EndpointError> {
        *self.graph.borrow_mut() = Graph::default();

        let graph = self.graph.clone();
        let registry = self.registry.clone();
        let _registry_listener = self
            .registry
            .add_listener_local()
            .global(move |global| {
                let Some(props) = global.props.as_ref() else {
                    return;
                };
                match global.type_ {
                    pw::types::ObjectType::Node => {
                        let Some(media_class) = props.get("media.class") else {
                            return;
                        };
                        if media_class != STREAM_OUTPUT_CLASS && media_class != SINK_CLASS {
                            return;
                        }
                        let identity = props
                            .get("application.process.binary")
                            .or_else(|| props.get("application.name"))
                            .map(str::to_string);
                        match registry.bind::<pw::node::Node, _>(global) {
                            Ok(node) => {
                                let entry = NodeEntry {
                                    media_class: media_class.to_string(),
                                    node_name: props.get("node.name").map(str::to_string),
                                    identity,
                                    proxy_id: node.upcast_ref().id(),
                                    channel_volumes: Vec::new(),
                                };
                                track_props(&graph, global.id, &node);
                                let mut graph = graph.borrow_mut();
                                graph.nodes.insert(global.id, entry);
                                graph.proxies.insert(global.id, node);
                            }
                            Err(e) => debug!("Skipping node {}: {}", global.id, e),
                        }
                    }
                    pw::types::ObjectType::Metadata => {
                        if props.get("metadata.name") != Some("default") {
                            return;
                        }
                        match registry.bind::<pw::metadata::Metadata, _>(global) {
                            Ok(metadata) => {
                                let graph_weak = Rc::downgrade(&graph);
                                let listener = metadata
                                    .add_listener_local()
                                    .property(move |_subject, key, _type, value| {
                                        if key != Some(DEFAULT_SINK_KEY) {
                                            return 0;
                                        }
                                        if let Some(graph) = graph_weak.upgrade() {
                                            graph.borrow_mut().default_sink =
                                                value.and_then(default_sink_name);
                                        }
                                        0
                                    })
                                    .register();
                                graph.borrow_mut().metadata.push((metadata, listener));
                            }
                            Err(e) => debug!("Skipping metadata {}: {}", global.id, e),
                        }
                    }
                    _ => {}
                }
            })
            .register();

        // First pass collects globals, second delivers their params and metadata
        self.roundtrip()?;
        for node in self.graph.borrow().proxies.values() {
            node.enum_params(0, Some(spa::param::ParamType::Props), 0, u32::MAX);
        }
        self.roundtrip()?;

        let graph = self.graph.borrow();
        trace!(
            "PipeWire graph: {} node(s), default sink {:?}",
            graph.nodes.len(),
            graph.default_sink
        );
        Ok(())
    }

    fn default_sink_id(&self) -> Result<u32, EndpointError> {
        let graph = self.graph.borrow();
        let sinks = graph
            .nodes
            .iter()
            .filter(|(_, node)| node.media_class == SINK_CLASS);

        let mut fallback = None;
        for (id, node) in sinks {
            if graph.default_sink.is_some() && node.node_name == graph.default_sink {
                return Ok(*id);
            }
            fallback.get_or_insert(*id);
        }
        fallback.ok_or(EndpointError::DeviceUnavailable)
    }

    fn node_volume(&self, id: u32) -> Option<f32> {
        let graph = self.graph.borrow();
        let volumes = &graph.nodes.get(&id)?.channel_volumes;
        if volumes.is_empty() {
            return None;
        }
        let mean = volumes.iter().sum::<f32>() / volumes.len() as f32;
        Some(scalar_from_linear(mean))
    }

    fn write_node_volume(&mut self, id: u32, volume: f32) -> Result<(), EndpointError> {
        let (channels, proxy_id) = {
            let graph = self.graph.borrow();
            let Some(node) = graph.nodes.get(&id) else {
                return Err(EndpointError::SessionStale { id });
            };
            (node.channel_volumes.len().max(1), node.proxy_id)
        };

        let bytes = props_pod(vec![linear_from_scalar(volume); channels])?;
        let pod = Pod::from_bytes(&bytes)
            .ok_or_else(|| EndpointError::Backend("Invalid volume pod".to_string()))?;

        {
            let graph = self.graph.borrow();
            let Some(proxy) = graph.proxies.get(&id) else {
                return Err(EndpointError::SessionStale { id });
            };
            proxy.set_param(spa::param::ParamType::Props, 0, pod);
        }

        self.last_error.borrow_mut().take();
        self.roundtrip()?;
        let error = self.last_error.borrow_mut().take();
        write_outcome(error, proxy_id, id)
    }
}

impl AudioConnection for PipeWireConnection {
    fn sessions(&mut self) -> Result<Vec<LiveSession>, EndpointError> {
        self.refresh()?;
        let ids: Vec<(u32, Option<String>)> = self
            .graph
            .borrow()
            .nodes
            .iter()
            .filter(|(_, node)| node.media_class == STREAM_OUTPUT_CLASS)
            .map(|(id, node)| (*id, node.identity.clone()))
            .collect();

        Ok(ids
            .into_iter()
            .filter_map(|(id, identity)| {
                let volume = self.node_volume(id)?;
                Some(LiveSession {
                    id,
                    identity,
                    volume,
                })
            })
            .collect())
    }

    fn set_session_volume(&mut self, id: u32, volume: f32) -> Result<(), EndpointError> {
        self.write_node_volume(id, volume)
    }

    fn master_volume(&mut self) -> Result<f32, EndpointError> {
        if self.graph.borrow().nodes.is_empty() {
            self.refresh()?;
        }
        let sink = self.default_sink_id()?;
        self.node_volume(sink).ok_or(EndpointError::DeviceUnavailable)
    }

    fn set_master_volume(&mut self, volume: f32) -> Result<(), EndpointError> {
        if self.graph.borrow().nodes.is_empty() {
            self.refresh()?;
        }
        let sink = self.default_sink_id()?;
        self.write_node_volume(sink, volume).map_err(|e| match e {
            EndpointError::SessionStale { .. } => EndpointError::DeviceUnavailable,
            other => other,
        })
    }
}

impl Drop for PipeWireConnection {
    fn drop(&mut self) {
        // Proxies and listeners must go before the core they belong to
        *self.graph.borrow_mut() = Graph::default();
        debug!("Closed PipeWire connection");
    }
}

/// Decide whether a core error seen during a volume write means the write
/// to node `id` (bound as `proxy_id`) failed
fn write_outcome(
    error: Option<(u32, String)>,
    proxy_id: u32,
    id: u32,
) -> Result<(), EndpointError> {
    match error {
        Some((err_id, message)) if err_id == proxy_id => {
            debug!("Setting volume on node {} failed: {}", id, message);
            Err(EndpointError::SessionStale { id })
        }
        Some((err_id, message)) => {
            trace!("Unrelated error on proxy {} while writing node {}: {}", err_id, id, message);
            Ok(())
        }
        None => Ok(()),
    }
}

/// Record Props updates for a bound node into the graph
fn track_props(graph: &Rc<RefCell<Graph>>, id: u32, node: &pw::node::Node) {
    let graph_weak = Rc::downgrade(graph);
    let listener = node
        .add_listener_local()
        .param(move |_seq, param_type, _index, _next, param| {
            if param_type != spa::param::ParamType::Props {
                return;
            }
            let Some(volumes) = param.and_then(channel_volumes) else {
                return;
            };
            if let Some(graph) = graph_weak.upgrade() {
                if let Some(node) = graph.borrow_mut().nodes.get_mut(&id) {
                    node.channel_volumes = volumes;
                }
            }
        })
        .register();
    graph.borrow_mut().node_listeners.push(listener);
}

/// Extract `channelVolumes` from a Props pod
fn channel_volumes(pod: &Pod) -> Option<Vec<f32>> {
    let (_, value) = PodDeserializer::deserialize_any_from(pod.as_bytes()).ok()?;
    let Value::Object(object) = value else {
        return None;
    };
    object
        .properties
        .into_iter()
        .find(|p| p.key == spa::sys::SPA_PROP_channelVolumes)
        .and_then(|p| match p.value {
            Value::ValueArray(ValueArray::Float(volumes)) if !volumes.is_empty() => Some(volumes),
            _ => None,
        })
}

/// Serialize a Props object setting every channel to the given linear gains
fn props_pod(volumes: Vec<f32>) -> Result<Vec<u8>, EndpointError> {
    let obj = spa::pod::Object {
        type_: spa::utils::SpaTypes::ObjectParamProps.as_raw(),
        id: spa::param::ParamType::Props.as_raw(),
        properties: vec![Property {
            key: spa::sys::SPA_PROP_channelVolumes,
            flags: PropertyFlags::empty(),
            value: Value::ValueArray(ValueArray::Float(volumes)),
        }],
    };

    let values: Vec<u8> = spa::pod::serialize::PodSerializer::serialize(
        std::io::Cursor::new(Vec::new()),
        &Value::Object(obj),
    )
    .map_err(|e| EndpointError::Backend(format!("Failed to serialize volume: {:?}", e)))?
    .0
    .into_inner();

    Ok(values)
}

/// The default sink metadata value is JSON like `{"name":"alsa_output..."}`
fn default_sink_name(value: &str) -> Option<String> {
    serde_json::from_str::<serde_json::Value>(value)
        .ok()?
        .get("name")?
        .as_str()
        .map(str::to_string)
}
