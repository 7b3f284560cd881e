use std::path::Path;

use quick_xml::{
    events::{BytesStart, Event},
    Reader,
};
use tracing::debug;

use crate::error::ParticipantError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataKind {
    Scalar,
    Vector,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataDecl {
    pub name: String,
    pub kind: DataKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MeshDecl {
    pub name: String,
    pub dimensions: usize,
    pub data: Vec<String>,
}

/// A `<read-data>` or `<write-data>` entry of a participant
#[derive(Debug, Clone, PartialEq)]
pub struct DataUse {
    pub data: String,
    pub mesh: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedMesh {
    pub name: String,
    pub from: String,
    /// Vertices may be queried directly through the library
    pub api_access: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParticipantDecl {
    pub name: String,
    pub provided_meshes: Vec<String>,
    pub received_meshes: Vec<ReceivedMesh>,
    pub read_data: Vec<DataUse>,
    pub write_data: Vec<DataUse>,
}

impl ParticipantDecl {
    pub fn uses_mesh(&self, mesh: &str) -> bool {
        self.provided_meshes.iter().any(|m| m == mesh)
            || self.received_meshes.iter().any(|m| m.name == mesh)
    }

    pub fn reads(&self, data: &str, mesh: &str) -> bool {
        self.read_data.iter().any(|d| d.data == data && d.mesh == mesh)
    }

    pub fn writes(&self, data: &str, mesh: &str) -> bool {
        self.write_data.iter().any(|d| d.data == data && d.mesh == mesh)
    }
}

/// A `<coupling-scheme:*>` element reduced to who takes part in it
#[derive(Debug, Clone, PartialEq)]
pub struct CouplingScheme {
    pub kind: String,
    pub participants: Vec<String>,
}

impl CouplingScheme {
    pub fn includes(&self, participant: &str) -> bool {
        self.participants.iter().any(|p| p == participant)
    }
}

/// A `<m2n:*>` communication channel between two participants
#[derive(Debug, Clone, PartialEq)]
pub struct M2nDecl {
    pub acceptor: String,
    pub connector: String,
}

impl M2nDecl {
    pub fn connects(&self, a: &str, b: &str) -> bool {
        (self.acceptor == a && self.connector == b) || (self.acceptor == b && self.connector == a)
    }
}

/// The parts of a coupling descriptor needed to check a participant's calls
/// before they reach the coupling library. Time stepping, exchanges,
/// mappings and acceleration are left to the library and are skipped.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CouplingConfig {
    pub data: Vec<DataDecl>,
    pub meshes: Vec<MeshDecl>,
    pub participants: Vec<ParticipantDecl>,
    pub schemes: Vec<CouplingScheme>,
    pub m2ns: Vec<M2nDecl>,
}

impl CouplingConfig {
    pub fn participant(&self, name: &str) -> Option<&ParticipantDecl> {
        self.participants.iter().find(|p| p.name == name)
    }

    pub fn mesh(&self, name: &str) -> Option<&MeshDecl> {
        self.meshes.iter().find(|m| m.name == name)
    }

    pub fn data(&self, name: &str) -> Option<&DataDecl> {
        self.data.iter().find(|d| d.name == name)
    }
}

#[derive(Debug, Default)]
struct XmlElement {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<XmlElement>,
}

impl XmlElement {
    fn from_start(start: &BytesStart) -> Result<Self, ParticipantError> {
        let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
        let mut attributes = Vec::new();

        for attr in start.attributes() {
            let attr = attr.map_err(|err| {
                ParticipantError::Configuration(format!("bad attribute on <{name}>: {err}"))
            })?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|err| {
                    ParticipantError::Configuration(format!(
                        "bad value for {key} on <{name}>: {err}"
                    ))
                })?
                .into_owned();
            attributes.push((key, value));
        }

        Ok(XmlElement {
            name,
            attributes,
            children: Vec::new(),
        })
    }

    fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Boolean attribute; absent means false
    fn flag(&self, key: &str) -> bool {
        matches!(self.attr(key), Some("true" | "yes" | "1"))
    }

    fn required(&self, key: &str) -> Result<&str, ParticipantError> {
        self.attr(key).ok_or_else(|| {
            ParticipantError::Configuration(format!(
                "<{}> is missing attribute {key}",
                self.name
            ))
        })
    }

    fn required_usize(&self, key: &str) -> Result<usize, ParticipantError> {
        let raw = self.required(key)?;
        raw.trim().parse().map_err(|_| {
            ParticipantError::Configuration(format!(
                "<{}> attribute {key} is not a non-negative integer: {raw}",
                self.name
            ))
        })
    }

    fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.name == name)
    }
}

/// Builds an element tree from raw XML. Prefixed tag names such as
/// `data:vector` are kept verbatim, they are not XML namespaces.
fn parse_tree(xml: &str) -> Result<XmlElement, ParticipantError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    // stack[0] is the document itself
    let mut stack: Vec<XmlElement> = vec![XmlElement::default()];

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => stack.push(XmlElement::from_start(&start)?),
            Ok(Event::Empty(start)) => {
                let element = XmlElement::from_start(&start)?;
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(element);
                }
            }
            Ok(Event::End(_)) => {
                if stack.len() < 2 {
                    return Err(ParticipantError::Configuration(
                        "unbalanced closing tag".to_string(),
                    ));
                }
                if let Some(element) = stack.pop() {
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(element);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => continue,
            Err(err) => {
                return Err(ParticipantError::Configuration(format!(
                    "malformed xml at byte {}: {err}",
                    reader.buffer_position()
                )))
            }
        }
    }

    if stack.len() != 1 {
        return Err(ParticipantError::Configuration(format!(
            "unclosed element <{}>",
            stack.last().map(|e| e.name.as_str()).unwrap_or_default()
        )));
    }

    stack
        .pop()
        .and_then(|document| document.children.into_iter().next())
        .ok_or_else(|| ParticipantError::Configuration("empty configuration".to_string()))
}

fn parse_data(element: &XmlElement, kind_tag: &str) -> Result<DataDecl, ParticipantError> {
    let kind = match kind_tag {
        "vector" => DataKind::Vector,
        "scalar" => DataKind::Scalar,
        other => {
            return Err(ParticipantError::Configuration(format!(
                "unknown data kind {other}"
            )))
        }
    };

    Ok(DataDecl {
        name: element.required("name")?.to_owned(),
        kind,
    })
}

fn parse_mesh(
    element: &XmlElement,
    fallback_dimensions: Option<usize>,
) -> Result<MeshDecl, ParticipantError> {
    let name = element.required("name")?.to_owned();

    let dimensions = match element.attr("dimensions") {
        Some(_) => element.required_usize("dimensions")?,
        None => fallback_dimensions.ok_or_else(|| {
            ParticipantError::Configuration(format!("mesh {name} declares no dimensions"))
        })?,
    };
    if dimensions != 2 && dimensions != 3 {
        return Err(ParticipantError::Configuration(format!(
            "mesh {name} has {dimensions} dimensions, only 2 and 3 are supported"
        )));
    }

    let data = element
        .children
        .iter()
        .filter(|c| c.name == "use-data")
        .map(|c| c.required("name").map(str::to_owned))
        .collect::<Result<Vec<String>, ParticipantError>>()?;

    Ok(MeshDecl {
        name,
        dimensions,
        data,
    })
}


fn parse_participant(element: &XmlElement) -> Result<ParticipantDecl, ParticipantError> {
    let mut participant = ParticipantDecl {
        name: element.required("name")?.to_owned(),
        ..Default::default()
    };

    for child in &element.children {
        match child.name.as_str() {
            "provide-mesh" => participant
                .provided_meshes
                .push(child.required("name")?.to_owned()),
            "receive-mesh" => participant.received_meshes.push(ReceivedMesh {
                name: child.required("name")?.to_owned(),
                from: child.required("from")?.to_owned(),
                api_access: child.flag("api-access"),
            }),
            // older descriptors: <use-mesh name=".." provide="yes"/> or <use-mesh from="..">
            "use-mesh" => {
                let name = child.required("name")?.to_owned();
                match child.attr("from") {
                    Some(from) => participant.received_meshes.push(ReceivedMesh {
                        name,
                        from: from.to_owned(),
                        api_access: child.flag("direct-access"),
                    }),
                    None => participant.provided_meshes.push(name),
                }
            }
            "read-data" => participant.read_data.push(DataUse {
                data: child.required("name")?.to_owned(),
                mesh: child.required("mesh")?.to_owned(),
            }),
            "write-data" => participant.write_data.push(DataUse {
                data: child.required("name")?.to_owned(),
                mesh: child.required("mesh")?.to_owned(),
            }),
            _ => continue,
        }
    }

    Ok(participant)
}

const SCHEME_KINDS: [&str; 5] = [
    "serial-explicit",
    "parallel-explicit",
    "serial-implicit",
    "parallel-implicit",
    "multi",
];

fn parse_scheme(element: &XmlElement, kind: &str) -> Result<CouplingScheme, ParticipantError> {
    if !SCHEME_KINDS.contains(&kind) {
        return Err(ParticipantError::Configuration(format!(
            "unsupported coupling scheme {kind}"
        )));
    }

    let mut participants = Vec::new();
    if let Some(pair) = element.child("participants") {
        participants.push(pair.required("first")?.to_owned());
        participants.push(pair.required("second")?.to_owned());
    }
    // multi coupling lists each participant on its own
    for child in element.children.iter().filter(|c| c.name == "participant") {
        participants.push(child.required("name")?.to_owned());
    }

    if participants.len() < 2 {
        return Err(ParticipantError::Configuration(format!(
            "<{}> needs at least two participants",
            element.name
        )));
    }

    Ok(CouplingScheme {
        kind: kind.to_owned(),
        participants,
    })
}

fn parse_m2n(element: &XmlElement) -> Result<M2nDecl, ParticipantError> {
    // v2 descriptors name the ends from/to
    let end = |key: &str, legacy: &str| {
        element
            .attr(key)
            .or_else(|| element.attr(legacy))
            .map(str::to_owned)
            .ok_or_else(|| {
                ParticipantError::Configuration(format!(
                    "<{}> is missing attribute {key}",
                    element.name
                ))
            })
    };

    Ok(M2nDecl {
        acceptor: end("acceptor", "from")?,
        connector: end("connector", "to")?,
    })
}

/// Checks that every data and mesh a participant reads or writes is declared
fn validate_references(config: &CouplingConfig) -> Result<(), ParticipantError> {
    for participant in &config.participants {
        for use_ in participant.read_data.iter().chain(&participant.write_data) {
            if config.data(&use_.data).is_none() {
                return Err(ParticipantError::Configuration(format!(
                    "{} uses undeclared data {}",
                    participant.name, use_.data
                )));
            }
            if config.mesh(&use_.mesh).is_none() {
                return Err(ParticipantError::Configuration(format!(
                    "{} uses undeclared mesh {}",
                    participant.name, use_.mesh
                )));
            }
        }
    }

    Ok(())
}

/// Parses a coupling descriptor
///
/// # Arguments
/// * `xml` - The descriptor contents
///
/// # Returns
/// The parsed configuration, or a Configuration error
pub fn parse(xml: &str) -> Result<CouplingConfig, ParticipantError> {
    let root = parse_tree(xml)?;
    if root.name != "precice-configuration" {
        return Err(ParticipantError::Configuration(format!(
            "unexpected root element <{}>",
            root.name
        )));
    }

    // Descriptors that still wrap everything in <solver-interface> carry the
    // dimensions there instead of on each mesh.
    let (scope, fallback_dimensions) = match root.child("solver-interface") {
        Some(interface) => {
            let dims = match interface.attr("dimensions") {
                Some(_) => Some(interface.required_usize("dimensions")?),
                None => None,
            };
            (interface, dims)
        }
        None => (&root, None),
    };

    let mut config = CouplingConfig::default();

    for element in &scope.children {
        let name = element.name.as_str();

        if let Some(kind_tag) = name.strip_prefix("data:") {
            config.data.push(parse_data(element, kind_tag)?);
        } else if name == "mesh" {
            config.meshes.push(parse_mesh(element, fallback_dimensions)?);
        } else if name == "participant" {
            config.participants.push(parse_participant(element)?);
        } else if let Some(scheme_tag) = name.strip_prefix("coupling-scheme:") {
            config.schemes.push(parse_scheme(element, scheme_tag)?);
        } else if name.starts_with("m2n:") {
            config.m2ns.push(parse_m2n(element)?);
        } else {
            debug!(element = name, "skipping configuration element");
        }
    }

    validate_references(&config)?;

    Ok(config)
}

/// Reads and parses a coupling descriptor from disk
pub fn load(path: &Path) -> Result<CouplingConfig, ParticipantError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) => {
            return Err(ParticipantError::Configuration(format!(
                "Unable to open coupling configuration {}: {err}",
                path.display()
            )));
        }
    };

    parse(&contents)
}

/// What one participant is allowed to do under a coupling descriptor.
///
/// The coupling library aborts the process on a bad mesh or data name.
/// Session backends check each call against this contract first, so those
/// mistakes surface as `ParticipantError`s instead.
#[derive(Debug, Clone)]
pub struct ParticipantContract {
    config: CouplingConfig,
    /// Position of the participant in `config.participants`
    participant_index: usize,
}

impl ParticipantContract {
    /// Binds a parsed descriptor to the participant named `participant`
    ///
    /// # Returns
    /// The contract, or a Configuration error if the participant is not declared
    pub fn resolve(config: CouplingConfig, participant: &str) -> Result<Self, ParticipantError> {
        let participant_index = config
            .participants
            .iter()
            .position(|p| p.name == participant)
            .ok_or_else(|| {
                ParticipantError::Configuration(format!(
                    "participant {participant} is not declared in the coupling configuration"
                ))
            })?;

        Ok(ParticipantContract {
            config,
            participant_index,
        })
    }

    pub fn load(path: &Path, participant: &str) -> Result<Self, ParticipantError> {
        ParticipantContract::resolve(load(path)?, participant)
    }

    pub fn config(&self) -> &CouplingConfig {
        &self.config
    }

    pub fn participant(&self) -> &ParticipantDecl {
        &self.config.participants[self.participant_index]
    }

    /// Dimensionality of a mesh the participant provides or receives
    pub fn mesh_dimensions(&self, mesh_name: &str) -> Result<usize, ParticipantError> {
        match self.config.mesh(mesh_name) {
            Some(mesh) if self.participant().uses_mesh(mesh_name) => Ok(mesh.dimensions),
            _ => Err(ParticipantError::UnknownMesh(mesh_name.to_owned())),
        }
    }

    /// Checks what the library needs before the handshake can succeed: a
    /// coupling scheme with declared peers, a communication channel to each
    /// peer, and a providing participant for each received mesh
    pub fn check_handshake(&self) -> Result<(), ParticipantError> {
        let me = self.participant();

        let schemes: Vec<&CouplingScheme> = self
            .config
            .schemes
            .iter()
            .filter(|s| s.includes(&me.name))
            .collect();
        if schemes.is_empty() {
            return Err(ParticipantError::Initialization(format!(
                "participant {} takes part in no coupling scheme",
                me.name
            )));
        }

        let peers = schemes
            .iter()
            .flat_map(|s| s.participants.iter())
            .filter(|p| **p != me.name);
        for peer in peers {
            if self.config.participant(peer).is_none() {
                return Err(ParticipantError::Initialization(format!(
                    "coupling peer {peer} is not declared"
                )));
            }
            if !self.config.m2ns.iter().any(|m| m.connects(&me.name, peer)) {
                return Err(ParticipantError::Initialization(format!(
                    "no m2n connects {} and {peer}",
                    me.name
                )));
            }
        }

        for received in &me.received_meshes {
            let provided = self
                .config
                .participant(&received.from)
                .map(|from| from.provided_meshes.contains(&received.name));
            match provided {
                None => {
                    return Err(ParticipantError::Initialization(format!(
                        "mesh {} is received from undeclared participant {}",
                        received.name, received.from
                    )))
                }
                Some(false) => {
                    return Err(ParticipantError::Initialization(format!(
                        "{} does not provide mesh {}",
                        received.from, received.name
                    )))
                }
                Some(true) => {}
            }
        }

        Ok(())
    }

    /// Received meshes whose vertices the participant may list directly
    pub fn direct_access_meshes(&self) -> impl Iterator<Item = &ReceivedMesh> {
        self.participant()
            .received_meshes
            .iter()
            .filter(|m| m.api_access)
    }

    pub fn is_received(&self, mesh_name: &str) -> bool {
        self.participant()
            .received_meshes
            .iter()
            .any(|m| m.name == mesh_name)
    }

    /// Vertices can be listed for provided meshes, and for received meshes
    /// declared with api access
    pub fn check_vertex_access(&self, mesh_name: &str) -> Result<(), ParticipantError> {
        if !self.participant().uses_mesh(mesh_name) {
            return Err(ParticipantError::call(
                "vertex_ids",
                format!("{} does not use mesh {mesh_name}", self.participant().name),
            ));
        }
        if self.is_received(mesh_name) && !self.direct_access_meshes().any(|m| m.name == mesh_name)
        {
            return Err(ParticipantError::call(
                "vertex_ids",
                format!("mesh {mesh_name} is received without api-access"),
            ));
        }
        Ok(())
    }

    /// Checks a vector read and returns the mesh dimensionality
    pub fn check_vector_read(&self, mesh_name: &str, data_name: &str) -> Result<usize, ParticipantError> {
        let reads = self.participant().reads(data_name, mesh_name);
        self.check_vector_use("read_vector_data", "read", mesh_name, data_name, reads)
    }

    /// Checks a vector write and returns the mesh dimensionality
    pub fn check_vector_write(&self, mesh_name: &str, data_name: &str) -> Result<usize, ParticipantError> {
        let writes = self.participant().writes(data_name, mesh_name);
        self.check_vector_use("write_vector_data", "write", mesh_name, data_name, writes)
    }

    fn check_vector_use(
        &self,
        operation: &'static str,
        verb: &str,
        mesh_name: &str,
        data_name: &str,
        declared: bool,
    ) -> Result<usize, ParticipantError> {
        let me = &self.participant().name;

        let mesh = self
            .config
            .mesh(mesh_name)
            .filter(|_| self.participant().uses_mesh(mesh_name))
            .ok_or_else(|| ParticipantError::call(operation, format!("{me} does not use mesh {mesh_name}")))?;
        let data = self.config.data(data_name).ok_or_else(|| {
            ParticipantError::call(operation, format!("data {data_name} is not declared"))
        })?;

        if data.kind != DataKind::Vector {
            return Err(ParticipantError::call(
                operation,
                format!("{data_name} is scalar data"),
            ));
        }
        if !mesh.data.iter().any(|d| d == data_name) {
            return Err(ParticipantError::call(
                operation,
                format!("mesh {mesh_name} does not carry {data_name}"),
            ));
        }
        if !declared {
            return Err(ParticipantError::call(
                operation,
                format!("{me} does not {verb} {data_name} on {mesh_name}"),
            ));
        }

        Ok(mesh.dimensions)
    }
}
