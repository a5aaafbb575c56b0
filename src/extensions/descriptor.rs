//! Extension descriptor model.
//!
//! Every extension describes itself through `get_info()`, returning an
//! [`ExtensionDescriptor`] that lists:
//! - Extension metadata (id, name, icons, colours)
//! - Blocks (opcode, block type, text, arguments)
//! - Menus (static option lists or named providers)
//!
//! Descriptors use the same JSON shape on both sides of a worker boundary, so
//! the field names follow the wire format (`blockType`, `blockIconURI`, ...).

use std::collections::BTreeMap;
use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Default primary colour of extension blocks.
pub const DEFAULT_COLOR1: &str = "#0FBD8C";
/// Default secondary colour of extension blocks.
pub const DEFAULT_COLOR2: &str = "#0DA57A";
/// Default tertiary colour of extension blocks.
pub const DEFAULT_COLOR3: &str = "#0B8E69";

/// Complete descriptor returned by an extension's `get_info()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionDescriptor {
    /// Unique identifier, also the opcode namespace.
    pub id: String,

    /// Human-readable name, used as the editor category.
    #[serde(default)]
    pub name: String,

    /// Icon shown at the left edge of each block.
    #[serde(default, rename = "blockIconURI", skip_serializing_if = "Option::is_none")]
    pub block_icon_uri: Option<String>,

    /// Icon shown in the category menu.
    #[serde(default, rename = "menuIconURI", skip_serializing_if = "Option::is_none")]
    pub menu_icon_uri: Option<String>,

    /// Whether the editor shows a peripheral connection status button.
    #[serde(default)]
    pub show_status_button: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color1: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color2: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color3: Option<String>,

    #[serde(default)]
    pub blocks: Vec<BlockDescriptor>,

    /// Menus in declaration order.
    #[serde(default)]
    pub menus: MenuTable,
}

impl ExtensionDescriptor {
    /// Create an empty descriptor.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            block_icon_uri: None,
            menu_icon_uri: None,
            show_status_button: false,
            color1: None,
            color2: None,
            color3: None,
            blocks: Vec::new(),
            menus: MenuTable::default(),
        }
    }

    /// Append a block.
    pub fn with_block(mut self, block: BlockDescriptor) -> Self {
        self.blocks.push(block);
        self
    }

    /// Append a menu.
    pub fn with_menu(mut self, name: impl Into<String>, spec: MenuSpec) -> Self {
        self.menus.insert(name, spec);
        self
    }

    pub fn with_block_icon(mut self, uri: impl Into<String>) -> Self {
        self.block_icon_uri = Some(uri.into());
        self
    }

    /// Resolved block colours, falling back to the defaults.
    pub fn colours(&self) -> [&str; 3] {
        [
            self.color1.as_deref().unwrap_or(DEFAULT_COLOR1),
            self.color2.as_deref().unwrap_or(DEFAULT_COLOR2),
            self.color3.as_deref().unwrap_or(DEFAULT_COLOR3),
        ]
    }
}

/// Block shape.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockType {
    #[default]
    #[serde(rename = "command")]
    Command,
    #[serde(rename = "reporter")]
    Reporter,
    #[serde(rename = "Boolean")]
    Boolean,
    #[serde(rename = "hat")]
    Hat,
    /// UI-only pseudo-block with no opcode function.
    #[serde(rename = "button")]
    Button,
}

impl BlockType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockType::Command => "command",
            BlockType::Reporter => "reporter",
            BlockType::Boolean => "Boolean",
            BlockType::Hat => "hat",
            BlockType::Button => "button",
        }
    }
}

/// A single block declaration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockDescriptor {
    /// Opcode, unique within the extension. Empty for buttons.
    #[serde(default)]
    pub opcode: String,

    #[serde(default)]
    pub block_type: BlockType,

    /// Block text with `[ARG]` placeholders. Defaults to the opcode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub arguments: BTreeMap<String, ArgSpec>,

    /// Callback key for button blocks. For other blocks, the extension
    /// method invoked instead of the opcode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub func: Option<String>,

    /// Command blocks that end a stack.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub terminal: bool,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub disable_monitor: bool,
}

impl BlockDescriptor {
    pub fn new(opcode: impl Into<String>, block_type: BlockType) -> Self {
        Self {
            opcode: opcode.into(),
            block_type,
            ..Default::default()
        }
    }

    /// A button pseudo-block triggering the UI callback `func`.
    pub fn button(func: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            block_type: BlockType::Button,
            text: Some(text.into()),
            func: Some(func.into()),
            ..Default::default()
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_func(mut self, func: impl Into<String>) -> Self {
        self.func = Some(func.into());
        self
    }

    /// Extension method that runs this block.
    pub fn method(&self) -> &str {
        self.func.as_deref().unwrap_or(&self.opcode)
    }

    pub fn with_argument(mut self, name: impl Into<String>, spec: ArgSpec) -> Self {
        self.arguments.insert(name.into(), spec);
        self
    }

    pub fn is_button(&self) -> bool {
        self.block_type == BlockType::Button
    }

    /// Text shown on the block.
    pub fn display_text(&self) -> &str {
        self.text.as_deref().unwrap_or(&self.opcode)
    }
}

/// Argument value type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArgumentType {
    #[serde(rename = "angle")]
    Angle,
    #[serde(rename = "Boolean")]
    Boolean,
    #[serde(rename = "color")]
    Color,
    #[serde(rename = "number")]
    Number,
    #[default]
    #[serde(rename = "string")]
    String,
    #[serde(rename = "matrix")]
    Matrix,
    #[serde(rename = "note")]
    Note,
}

impl ArgumentType {
    /// Shadow block type the editor attaches to an input of this type.
    pub fn shadow_type(&self) -> Option<&'static str> {
        match self {
            ArgumentType::Angle => Some("math_angle"),
            ArgumentType::Boolean => None,
            ArgumentType::Color => Some("colour_picker"),
            ArgumentType::Number => Some("math_number"),
            ArgumentType::String => Some("text"),
            ArgumentType::Matrix => Some("matrix"),
            ArgumentType::Note => Some("note"),
        }
    }
}

/// Argument declaration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArgSpec {
    #[serde(rename = "type", default)]
    pub arg_type: ArgumentType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,

    /// Name of a menu declared in the same descriptor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub menu: Option<String>,
}

impl ArgSpec {
    pub fn new(arg_type: ArgumentType) -> Self {
        Self {
            arg_type,
            ..Default::default()
        }
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn with_menu(mut self, menu: impl Into<String>) -> Self {
        self.menu = Some(menu.into());
        self
    }
}

/// One entry of a menu as an extension declares it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MenuItem {
    /// `{ "text": ..., "value": ... }`
    Labeled { text: String, value: Value },
    /// A bare string or number used as both text and value.
    Scalar(Value),
}

impl MenuItem {
    /// Normalize into a `[text, value]` pair.
    pub fn to_option(&self) -> MenuOption {
        match self {
            MenuItem::Labeled { text, value } => MenuOption(text.clone(), value_text(value)),
            MenuItem::Scalar(value) => {
                let text = value_text(value);
                MenuOption(text.clone(), text)
            }
        }
    }
}

impl From<&str> for MenuItem {
    fn from(value: &str) -> Self {
        MenuItem::Scalar(Value::String(value.to_string()))
    }
}

impl From<i64> for MenuItem {
    fn from(value: i64) -> Self {
        MenuItem::Scalar(Value::from(value))
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Normalized `[text, value]` menu option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuOption(pub String, pub String);

impl MenuOption {
    pub fn text(&self) -> &str {
        &self.0
    }

    pub fn value(&self) -> &str {
        &self.1
    }
}

/// Menu contents, detected by the runtime kind of the declared value:
/// a sequence is static, a string names a provider method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MenuItems {
    Static(Vec<MenuItem>),
    Dynamic(String),
}

/// Menu declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MenuSpec {
    Items(MenuItems),
    Detailed {
        #[serde(rename = "acceptReporters", default)]
        accept_reporters: bool,
        items: MenuItems,
    },
}

impl MenuSpec {
    /// A static menu.
    pub fn fixed<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<MenuItem>,
    {
        MenuSpec::Items(MenuItems::Static(items.into_iter().map(Into::into).collect()))
    }

    /// A dynamic menu served by the provider `method`.
    pub fn provider(method: impl Into<String>) -> Self {
        MenuSpec::Items(MenuItems::Dynamic(method.into()))
    }

    pub fn items(&self) -> &MenuItems {
        match self {
            MenuSpec::Items(items) => items,
            MenuSpec::Detailed { items, .. } => items,
        }
    }

    pub fn accept_reporters(&self) -> bool {
        match self {
            MenuSpec::Items(_) => false,
            MenuSpec::Detailed {
                accept_reporters, ..
            } => *accept_reporters,
        }
    }

    /// Provider method name if this menu is dynamic.
    pub fn provider_name(&self) -> Option<&str> {
        match self.items() {
            MenuItems::Dynamic(name) => Some(name),
            MenuItems::Static(_) => None,
        }
    }
}

/// Menus keyed by name, kept in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MenuTable(Vec<(String, MenuSpec)>);

impl MenuTable {
    /// Insert or replace a menu, keeping the original position on replace.
    pub fn insert(&mut self, name: impl Into<String>, spec: MenuSpec) {
        let name = name.into();
        match self.0.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = spec,
            None => self.0.push((name, spec)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&MenuSpec> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, spec)| spec)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MenuSpec)> {
        self.0.iter().map(|(n, spec)| (n.as_str(), spec))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for MenuTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, spec) in &self.0 {
            map.serialize_entry(name, spec)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for MenuTable {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct MenuTableVisitor;

        impl<'de> Visitor<'de> for MenuTableVisitor {
            type Value = MenuTable;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of menu names to menu specs")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<MenuTable, A::Error> {
                let mut table = MenuTable::default();
                while let Some((name, spec)) = access.next_entry::<String, MenuSpec>()? {
                    table.insert(name, spec);
                }
                Ok(table)
            }
        }

        deserializer.deserialize_map(MenuTableVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_descriptor_defaults() {
        let descriptor: ExtensionDescriptor = serde_json::from_value(json!({
            "id": "testInternalExtension",
            "name": "Test Internal Extension",
            "blocks": [{ "opcode": "go" }]
        }))
        .unwrap();

        assert_eq!(descriptor.blocks.len(), 1);
        assert_eq!(descriptor.blocks[0].block_type, BlockType::Command);
        assert_eq!(descriptor.blocks[0].display_text(), "go");
        assert!(descriptor.menus.is_empty());
        assert_eq!(descriptor.colours(), [DEFAULT_COLOR1, DEFAULT_COLOR2, DEFAULT_COLOR3]);
    }

    #[test]
    fn test_menu_kind_detection() {
        let descriptor: ExtensionDescriptor = serde_json::from_value(json!({
            "id": "ext",
            "menus": {
                "simpleMenu": ["abcd", "efgh", "ijkl"],
                "dynamicMenu": "_buildDynamicMenu",
                "ledOutVal": [{ "text": "ON", "value": 1 }, { "text": "OFF", "value": 0 }],
                "axis": { "acceptReporters": true, "items": ["x", "y", "z"] }
            }
        }))
        .unwrap();

        let names: Vec<&str> = descriptor.menus.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["simpleMenu", "dynamicMenu", "ledOutVal", "axis"]);

        let simple = descriptor.menus.get("simpleMenu").unwrap();
        assert!(matches!(simple.items(), MenuItems::Static(items) if items.len() == 3));
        assert_eq!(
            descriptor.menus.get("dynamicMenu").unwrap().provider_name(),
            Some("_buildDynamicMenu")
        );

        let axis = descriptor.menus.get("axis").unwrap();
        assert!(axis.accept_reporters());
        assert!(axis.provider_name().is_none());
    }

    #[test]
    fn test_menu_item_normalization() {
        let labeled = MenuItem::Labeled {
            text: "ON".to_string(),
            value: json!(1),
        };
        assert_eq!(labeled.to_option(), MenuOption("ON".into(), "1".into()));
        assert_eq!(MenuItem::from(6).to_option(), MenuOption("6".into(), "6".into()));
        assert_eq!(
            MenuItem::from("abcd").to_option(),
            MenuOption("abcd".into(), "abcd".into())
        );
    }

    #[test]
    fn test_button_block_round_trip_shape() {
        let button = BlockDescriptor::button("MAKE_A_VARIABLE", "make a variable");
        let value = serde_json::to_value(&button).unwrap();
        assert_eq!(value["blockType"], "button");
        assert_eq!(value["func"], "MAKE_A_VARIABLE");
        assert!(value.get("terminal").is_none());
    }

    #[test]
    fn test_block_method() {
        assert_eq!(BlockDescriptor::new("speak", BlockType::Command).method(), "speak");
        assert_eq!(BlockDescriptor::new("speak", BlockType::Command).with_func("say").method(), "say");
    }

    #[test]
    fn test_menu_table_replace_keeps_position() {
        let mut table = MenuTable::default();
        table.insert("a", MenuSpec::fixed(["1"]));
        table.insert("b", MenuSpec::provider("_b"));
        table.insert("a", MenuSpec::fixed(["1", "2"]));

        let names: Vec<&str> = table.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(table.len(), 2);
    }
}
