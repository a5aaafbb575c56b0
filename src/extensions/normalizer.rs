//! Block and menu info normalization.
//!
//! Turns the descriptor an extension returns from `get_info()` into:
//! - editor-facing block JSON and button XML,
//! - menu JSON with static options or live providers,
//! - the opcode functions to register, bound to the extension instance.
//!
//! The instance is either in-process ([`InstanceBinding::Local`]) or hosted on
//! a worker ([`InstanceBinding::Worker`]); normalization is identical for both
//! and only the bodies of the bound functions differ.

use std::collections::HashSet;
use std::fmt;

use serde::ser::SerializeSeq;
use serde::{Serialize, Serializer};
use serde_json::{json, Map, Value};
use tracing::warn;

use super::descriptor::{
    ArgSpec, ArgumentType, BlockDescriptor, BlockType, ExtensionDescriptor, MenuItems, MenuOption,
    MenuSpec,
};
use super::dispatch::{DispatchHandle, WireErrorKind};
use super::error::{ExtensionError, ExtensionResult};
use super::extension::{BlockArgs, BlockContext, SharedExtension};
use super::registry::{qualify, BlockReturn, OpcodeFunction};
use super::{ExtensionId, WorkerId};

/// Worker method prefix for dynamic menu providers.
pub const MENU_METHOD_PREFIX: &str = "menu:";

/// Where the extension instance behind a descriptor lives.
#[derive(Clone)]
pub enum InstanceBinding {
    Local(SharedExtension),
    Worker(WorkerBinding),
}

/// An extension instance served by a worker.
#[derive(Clone)]
pub struct WorkerBinding {
    pub dispatch: DispatchHandle,
    pub worker: WorkerId,
    /// Service name of the instance on the worker.
    pub service: String,
    /// Menu providers the instance reported when it loaded.
    pub menu_providers: HashSet<String>,
}

impl InstanceBinding {
    fn has_menu_provider(&self, name: &str) -> bool {
        match self {
            InstanceBinding::Local(extension) => extension.lock().has_menu_provider(name),
            InstanceBinding::Worker(binding) => binding.menu_providers.contains(name),
        }
    }
}

impl fmt::Debug for InstanceBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceBinding::Local(_) => f.write_str("Local(..)"),
            InstanceBinding::Worker(binding) => f
                .debug_struct("Worker")
                .field("worker", &binding.worker)
                .field("service", &binding.service)
                .finish(),
        }
    }
}

/// Function bound to a block.
#[derive(Debug, Clone)]
pub enum BlockFunc {
    Callable(OpcodeFunction),
    /// UI callback key of a button.
    Callback(String),
}

/// A block descriptor with its bound function.
#[derive(Debug, Clone)]
pub struct PreparedBlock {
    pub descriptor: BlockDescriptor,
    pub func: BlockFunc,
}

/// Normalized block.
#[derive(Debug, Clone)]
pub struct BlockInfo {
    pub info: PreparedBlock,
    /// Editor block definition. `None` for buttons.
    pub json: Option<Value>,
    /// Toolbox XML. Only buttons have one.
    pub xml: Option<String>,
}

/// Menu options as served to the editor.
#[derive(Debug, Clone)]
pub enum MenuOptions {
    Static(Vec<MenuOption>),
    Dynamic(DynamicMenu),
}

impl Serialize for MenuOptions {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            MenuOptions::Static(options) => {
                let mut seq = serializer.serialize_seq(Some(options.len()))?;
                for option in options {
                    seq.serialize_element(option)?;
                }
                seq.end()
            }
            MenuOptions::Dynamic(menu) => serializer.serialize_str(&menu.provider),
        }
    }
}

/// A menu whose options are produced by a provider on the instance.
///
/// Each call reaches the provider again; results are never cached.
#[derive(Clone)]
pub struct DynamicMenu {
    pub extension_id: ExtensionId,
    pub menu: String,
    pub provider: String,
    binding: InstanceBinding,
}

impl fmt::Debug for DynamicMenu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicMenu")
            .field("extension_id", &self.extension_id)
            .field("menu", &self.menu)
            .field("provider", &self.provider)
            .field("binding", &self.binding)
            .finish()
    }
}

impl DynamicMenu {
    fn label(&self) -> String {
        menu_block_type(&self.extension_id, &self.menu)
    }

    /// Ask the provider for the current options, as a JSON list of
    /// `[text, value]` pairs.
    pub fn call(&self) -> BlockReturn {
        match &self.binding {
            InstanceBinding::Local(extension) => {
                let result = extension
                    .lock()
                    .menu_items(&self.provider)
                    .map_err(|e| ExtensionError::runtime(self.label(), e))
                    .and_then(|items| {
                        let options: Vec<MenuOption> = items.iter().map(|i| i.to_option()).collect();
                        Ok(serde_json::to_value(options)?)
                    });
                BlockReturn::Ready(result)
            }
            InstanceBinding::Worker(binding) => {
                let binding = binding.clone();
                let method = format!("{}{}", MENU_METHOD_PREFIX, self.provider);
                let label = self.label();
                BlockReturn::Pending(Box::pin(async move {
                    binding
                        .dispatch
                        .call(binding.worker, &binding.service, &method, Vec::new())
                        .await
                        .map_err(|e| wrap_worker_failure(label, e))
                }))
            }
        }
    }

    /// Current options.
    pub async fn options(&self) -> ExtensionResult<Vec<MenuOption>> {
        let value = self.call().resolve().await?;
        Ok(serde_json::from_value(value)?)
    }
}

/// The single dropdown field of a menu block.
#[derive(Debug, Clone, Serialize)]
pub struct MenuField {
    #[serde(rename = "type")]
    pub field_type: &'static str,
    pub name: String,
    pub options: MenuOptions,
}

/// Editor definition of a menu block.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuJson {
    #[serde(rename = "type")]
    pub block_type: String,
    pub message0: &'static str,
    pub output: &'static str,
    pub output_shape: u8,
    args0: [MenuField; 1],
}

impl MenuJson {
    pub fn options(&self) -> &MenuOptions {
        let [field] = &self.args0;
        &field.options
    }
}

/// Normalized menu.
#[derive(Debug, Clone)]
pub struct MenuInfo {
    pub name: String,
    pub accept_reporters: bool,
    pub json: MenuJson,
}

impl MenuInfo {
    pub fn to_json(&self) -> Value {
        json!({
            "name": self.name,
            "acceptReporters": self.accept_reporters,
            "json": self.json,
        })
    }

    /// Menu JSON with dynamic options resolved to their current values.
    pub async fn editor_json(&self) -> ExtensionResult<Value> {
        let mut value = self.to_json();
        if let MenuOptions::Dynamic(menu) = self.json.options() {
            let options = menu.options().await?;
            value["json"]["args0"][0]["options"] = serde_json::to_value(options)?;
        }
        Ok(value)
    }
}

/// Normalized metadata of one extension.
#[derive(Debug, Clone)]
pub struct BlockInfoEntry {
    pub id: ExtensionId,
    pub name: String,
    pub block_icon_uri: Option<String>,
    pub menu_icon_uri: Option<String>,
    pub show_status_button: bool,
    pub colours: [String; 3],
    pub blocks: Vec<BlockInfo>,
    pub menus: Vec<MenuInfo>,
}

impl BlockInfoEntry {
    pub fn menu(&self, name: &str) -> Option<&MenuInfo> {
        self.menus.iter().find(|m| m.name == name)
    }

    pub fn block(&self, opcode: &str) -> Option<&BlockInfo> {
        self.blocks
            .iter()
            .find(|b| !b.info.descriptor.is_button() && b.info.descriptor.opcode == opcode)
    }

    fn base_json(&self, menus: Vec<Value>) -> Value {
        let blocks: Vec<Value> = self
            .blocks
            .iter()
            .map(|b| {
                json!({
                    "info": b.info.descriptor,
                    "json": b.json,
                    "xml": b.xml,
                })
            })
            .collect();
        json!({
            "id": self.id,
            "name": self.name,
            "blockIconURI": self.block_icon_uri,
            "menuIconURI": self.menu_icon_uri,
            "showStatusButton": self.show_status_button,
            "colour": self.colours[0],
            "colourSecondary": self.colours[1],
            "colourTertiary": self.colours[2],
            "blocks": blocks,
            "menus": menus,
        })
    }

    /// JSON view with dynamic menus shown by provider name.
    pub fn to_json(&self) -> Value {
        self.base_json(self.menus.iter().map(MenuInfo::to_json).collect())
    }

    /// JSON view with every dynamic menu resolved.
    pub async fn editor_json(&self) -> ExtensionResult<Value> {
        let mut menus = Vec::with_capacity(self.menus.len());
        for menu in &self.menus {
            menus.push(menu.editor_json().await?);
        }
        Ok(self.base_json(menus))
    }
}

/// Output of [`normalize`].
#[derive(Debug)]
pub struct NormalizedExtension {
    pub entry: BlockInfoEntry,
    /// Qualified opcode -> function, in block order.
    pub functions: Vec<(String, OpcodeFunction)>,
}

/// Normalize a descriptor bound to `binding`.
pub fn normalize(
    descriptor: &ExtensionDescriptor,
    binding: &InstanceBinding,
) -> ExtensionResult<NormalizedExtension> {
    let extension_id = descriptor.id.as_str();
    let colours = descriptor.colours().map(str::to_string);

    let mut menus = Vec::with_capacity(descriptor.menus.len());
    for (name, spec) in descriptor.menus.iter() {
        menus.push(normalize_menu(extension_id, name, spec, binding)?);
    }

    let mut blocks = Vec::with_capacity(descriptor.blocks.len());
    let mut functions = Vec::new();
    for block in &descriptor.blocks {
        if block.is_button() {
            blocks.push(button_info(block));
            continue;
        }

        let qualified = qualify(extension_id, &block.opcode)?;
        let function = bind_opcode(extension_id, block, &qualified, binding);
        let json = block_json(descriptor, block, &qualified, &colours, &menus)?;
        functions.push((qualified, function.clone()));
        blocks.push(BlockInfo {
            info: PreparedBlock {
                descriptor: block.clone(),
                func: BlockFunc::Callable(function),
            },
            json: Some(json),
            xml: None,
        });
    }

    Ok(NormalizedExtension {
        entry: BlockInfoEntry {
            id: descriptor.id.clone(),
            name: descriptor.name.clone(),
            block_icon_uri: descriptor.block_icon_uri.clone(),
            menu_icon_uri: descriptor.menu_icon_uri.clone(),
            show_status_button: descriptor.show_status_button,
            colours,
            blocks,
            menus,
        },
        functions,
    })
}

fn menu_block_type(extension_id: &str, menu: &str) -> String {
    format!("{}_menu_{}", extension_id, menu)
}

fn normalize_menu(
    extension_id: &str,
    name: &str,
    spec: &MenuSpec,
    binding: &InstanceBinding,
) -> ExtensionResult<MenuInfo> {
    let options = match spec.items() {
        MenuItems::Static(items) => MenuOptions::Static(items.iter().map(|i| i.to_option()).collect()),
        MenuItems::Dynamic(provider) => {
            if !binding.has_menu_provider(provider) {
                return Err(ExtensionError::InvalidMenuReference {
                    extension: extension_id.to_string(),
                    menu: name.to_string(),
                    reference: provider.clone(),
                });
            }
            MenuOptions::Dynamic(DynamicMenu {
                extension_id: extension_id.to_string(),
                menu: name.to_string(),
                provider: provider.clone(),
                binding: binding.clone(),
            })
        }
    };

    Ok(MenuInfo {
        name: name.to_string(),
        accept_reporters: spec.accept_reporters(),
        json: MenuJson {
            block_type: menu_block_type(extension_id, name),
            message0: "%1",
            output: "String",
            output_shape: 2,
            args0: [MenuField {
                field_type: "field_dropdown",
                name: name.to_string(),
                options,
            }],
        },
    })
}

fn bind_opcode(
    extension_id: &str,
    block: &BlockDescriptor,
    qualified: &str,
    binding: &InstanceBinding,
) -> OpcodeFunction {
    let opcode = block.opcode.as_str();
    let method = block.method().to_string();
    let qualified = qualified.to_string();
    match binding {
        InstanceBinding::Local(extension) => {
            let extension = extension.clone();
            OpcodeFunction::from_fn(extension_id, opcode, move |args, context| {
                let result = extension
                    .lock()
                    .invoke(&method, args, context)
                    .map_err(|e| ExtensionError::runtime(qualified.clone(), e));
                BlockReturn::Ready(result)
            })
        }
        InstanceBinding::Worker(binding) => {
            let binding = binding.clone();
            OpcodeFunction::from_fn(extension_id, opcode, move |args: &BlockArgs, context: &BlockContext| {
                let context = match serde_json::to_value(context) {
                    Ok(value) => value,
                    Err(e) => return BlockReturn::Ready(Err(e.into())),
                };
                let payload = vec![Value::Object(args.clone()), context];
                let binding = binding.clone();
                let method = method.clone();
                let qualified = qualified.clone();
                BlockReturn::Pending(Box::pin(async move {
                    binding
                        .dispatch
                        .call(binding.worker, &binding.service, &method, payload)
                        .await
                        .map_err(|e| wrap_worker_failure(qualified, e))
                }))
            })
        }
    }
}

/// Failures raised by extension code on a worker surface as runtime errors
/// of the opcode; transport failures pass through.
fn wrap_worker_failure(opcode: String, error: ExtensionError) -> ExtensionError {
    match error {
        ExtensionError::WorkerCallError {
            kind: WireErrorKind::Runtime,
            ..
        } => ExtensionError::runtime(opcode, error),
        other => other,
    }
}

fn button_info(block: &BlockDescriptor) -> BlockInfo {
    let callback = block.func.clone().unwrap_or_default();
    let xml = format!(
        "<button text=\"{}\" callbackKey=\"{}\"></button>",
        xml_escape(block.display_text()),
        xml_escape(&callback)
    );
    BlockInfo {
        info: PreparedBlock {
            descriptor: block.clone(),
            func: BlockFunc::Callback(callback),
        },
        json: None,
        xml: Some(xml),
    }
}

fn xml_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

/// Piece of block text.
#[derive(Debug, PartialEq)]
enum Segment<'a> {
    Text(&'a str),
    /// `[NAME]` placeholder.
    Arg(&'a str),
}

fn segments(text: &str) -> Vec<Segment<'_>> {
    let mut out = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find('[') {
        let close = match rest[open + 1..].find(']') {
            Some(i) => open + 1 + i,
            None => break,
        };
        if close == open + 1 {
            out.push(Segment::Text(&rest[..=close]));
        } else {
            if open > 0 {
                out.push(Segment::Text(&rest[..open]));
            }
            out.push(Segment::Arg(&rest[open + 1..close]));
        }
        rest = &rest[close + 1..];
    }
    if !rest.is_empty() {
        out.push(Segment::Text(rest));
    }
    out
}

fn block_json(
    descriptor: &ExtensionDescriptor,
    block: &BlockDescriptor,
    qualified: &str,
    colours: &[String; 3],
    menus: &[MenuInfo],
) -> ExtensionResult<Value> {
    let extension_id = descriptor.id.as_str();
    let mut args0 = Vec::new();
    let mut message = String::new();

    if let Some(icon) = &descriptor.block_icon_uri {
        args0.push(json!({ "type": "field_image", "src": icon, "width": 40, "height": 40 }));
        args0.push(json!({ "type": "field_vertical_separator" }));
        message.push_str("%1 %2 ");
    }

    for segment in segments(block.display_text()) {
        match segment {
            Segment::Text(text) => message.push_str(text),
            Segment::Arg(name) => {
                args0.push(argument_json(extension_id, block, name, menus)?);
                message.push_str(&format!("%{}", args0.len()));
            }
        }
    }

    let mut json = Map::new();
    json.insert("type".into(), json!(qualified));
    json.insert("inputsInline".into(), json!(true));
    json.insert("category".into(), json!(descriptor.name));
    json.insert("colour".into(), json!(colours[0]));
    json.insert("colourSecondary".into(), json!(colours[1]));
    json.insert("colourTertiary".into(), json!(colours[2]));
    json.insert("message0".into(), json!(message));
    json.insert("args0".into(), Value::Array(args0));

    match block.block_type {
        BlockType::Command => {
            json.insert("previousStatement".into(), Value::Null);
            if !block.terminal {
                json.insert("nextStatement".into(), Value::Null);
            }
        }
        BlockType::Reporter => {
            json.insert("output".into(), json!("String"));
            json.insert("outputShape".into(), json!(2));
            if !block.disable_monitor && block.arguments.is_empty() {
                json.insert("checkboxInFlyout".into(), json!(true));
            }
        }
        BlockType::Boolean => {
            json.insert("output".into(), json!("Boolean"));
            json.insert("outputShape".into(), json!(1));
        }
        BlockType::Hat => {
            json.insert("nextStatement".into(), Value::Null);
        }
        BlockType::Button => {}
    }

    Ok(Value::Object(json))
}

fn argument_json(
    extension_id: &str,
    block: &BlockDescriptor,
    name: &str,
    menus: &[MenuInfo],
) -> ExtensionResult<Value> {
    let undeclared;
    let spec: &ArgSpec = match block.arguments.get(name) {
        Some(spec) => spec,
        None => {
            warn!(
                extension_id = %extension_id,
                opcode = %block.opcode,
                argument = %name,
                "Block text references an undeclared argument, using a string input"
            );
            undeclared = ArgSpec::new(ArgumentType::String);
            &undeclared
        }
    };

    if let Some(menu_name) = &spec.menu {
        let menu = menus.iter().find(|m| &m.name == menu_name).ok_or_else(|| {
            ExtensionError::InvalidMenuReference {
                extension: extension_id.to_string(),
                menu: menu_name.clone(),
                reference: format!("{}.{}", block.opcode, name),
            }
        })?;

        if !menu.accept_reporters {
            let mut field = json!({ "type": "field_dropdown", "name": name });
            match menu.json.options() {
                MenuOptions::Static(options) => field["options"] = json!(options),
                MenuOptions::Dynamic(_) => field["menu"] = json!(menu.json.block_type),
            }
            return Ok(field);
        }

        let mut shadow = json!({ "type": menu.json.block_type });
        if let Some(default) = &spec.default_value {
            shadow["fieldValue"] = default.clone();
        }
        return Ok(json!({ "type": "input_value", "name": name, "shadow": shadow }));
    }

    match spec.arg_type.shadow_type() {
        None => Ok(json!({ "type": "input_value", "name": name, "check": "Boolean" })),
        Some(shadow_type) => {
            let mut shadow = json!({ "type": shadow_type });
            if let Some(default) = &spec.default_value {
                shadow["fieldValue"] = default.clone();
            }
            Ok(json!({ "type": "input_value", "name": name, "shadow": shadow }))
        }
    }
}

/// Arguments with their declared default values filled in.
pub fn default_args(block: &BlockDescriptor) -> BlockArgs {
    block
        .arguments
        .iter()
        .filter_map(|(name, spec)| spec.default_value.clone().map(|v| (name.clone(), v)))
        .collect()
}
