use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    pub referenced_table: String,
    pub referenced_field: String,
}

impl ForeignKey {
    /// Returns `None` when either side of the reference is blank.
    pub fn new(referenced_table: &str, referenced_field: &str) -> Option<Self> {
        let table = referenced_table.trim();
        let field = referenced_field.trim();
        if table.is_empty() || field.is_empty() {
            return None;
        }
        Some(Self {
            referenced_table: table.to_string(),
            referenced_field: field.to_string(),
        })
    }

    pub fn is_complete(&self) -> bool {
        !self.referenced_table.trim().is_empty() && !self.referenced_field.trim().is_empty()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub auto_increment: bool,
    #[serde(default)]
    pub index: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreign_key: Option<ForeignKey>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct Table {
    #[serde(rename = "table_name")]
    pub name: String,
    pub fields: Vec<Field>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub charset: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub primary_keys: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unique_keys: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inserts: Vec<String>,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name.eq_ignore_ascii_case(name))
    }

    pub fn field_mut(&mut self, name: &str) -> Option<&mut Field> {
        self.fields.iter_mut().find(|f| f.name.eq_ignore_ascii_case(name))
    }

    pub fn has_composite_key(&self) -> bool {
        self.primary_keys.len() > 1
    }

    /// Appends a primary-key column unless an equal name (ignoring ASCII case)
    /// is already listed.
    pub fn add_primary_key(&mut self, column: &str) {
        if !self.primary_keys.iter().any(|k| k.eq_ignore_ascii_case(column)) {
            self.primary_keys.push(column.to_string());
        }
    }

    /// Copy of the table as handed to a generator: inserts are left behind and
    /// only complete foreign-key references survive.
    pub fn generation_view(&self) -> Table {
        let fields = self
            .fields
            .iter()
            .map(|f| Field {
                foreign_key: f
                    .foreign_key
                    .as_ref()
                    .filter(|fk| fk.is_complete())
                    .and_then(|fk| ForeignKey::new(&fk.referenced_table, &fk.referenced_field)),
                ..f.clone()
            })
            .collect();

        Table {
            name: self.name.clone(),
            fields,
            engine: self.engine.clone(),
            charset: self.charset.clone(),
            primary_keys: self.primary_keys.clone(),
            unique_keys: self.unique_keys.clone(),
            inserts: Vec::new(),
        }
    }
}
