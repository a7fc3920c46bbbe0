//! Parsing of document-store calls and operation-list files.
//!
//! Everything here is pure: a call or descriptor is turned into a typed
//! plan before any I/O, so unknown methods and malformed arguments are
//! rejected up front.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use mongodb::bson::{Bson, Document};
use serde_json::{Map, Value};

use crate::error::{Result, StoreError};

/// Collection methods reachable through `query("<collection>.<method>")`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionMethod {
    InsertOne,
    InsertMany,
    Find,
    FindOne,
    UpdateOne,
    UpdateMany,
    DeleteOne,
    DeleteMany,
    CountDocuments,
    Aggregate,
    Distinct,
    CreateIndex,
    Drop,
}

impl CollectionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionMethod::InsertOne => "insertOne",
            CollectionMethod::InsertMany => "insertMany",
            CollectionMethod::Find => "find",
            CollectionMethod::FindOne => "findOne",
            CollectionMethod::UpdateOne => "updateOne",
            CollectionMethod::UpdateMany => "updateMany",
            CollectionMethod::DeleteOne => "deleteOne",
            CollectionMethod::DeleteMany => "deleteMany",
            CollectionMethod::CountDocuments => "countDocuments",
            CollectionMethod::Aggregate => "aggregate",
            CollectionMethod::Distinct => "distinct",
            CollectionMethod::CreateIndex => "createIndex",
            CollectionMethod::Drop => "drop",
        }
    }
}

impl FromStr for CollectionMethod {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        let method = match s {
            "insertOne" => CollectionMethod::InsertOne,
            "insertMany" => CollectionMethod::InsertMany,
            "find" => CollectionMethod::Find,
            "findOne" => CollectionMethod::FindOne,
            "updateOne" => CollectionMethod::UpdateOne,
            "updateMany" => CollectionMethod::UpdateMany,
            "deleteOne" => CollectionMethod::DeleteOne,
            "deleteMany" => CollectionMethod::DeleteMany,
            "countDocuments" => CollectionMethod::CountDocuments,
            "aggregate" => CollectionMethod::Aggregate,
            "distinct" => CollectionMethod::Distinct,
            "createIndex" => CollectionMethod::CreateIndex,
            "drop" => CollectionMethod::Drop,
            other => {
                return Err(StoreError::unsupported(format!(
                    "unsupported collection method '{}'",
                    other
                )))
            }
        };
        Ok(method)
    }
}

impl fmt::Display for CollectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options accepted by `find` / `findOne`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindSpec {
    pub filter: Document,
    pub sort: Option<Document>,
    pub projection: Option<Document>,
    pub limit: Option<i64>,
    pub skip: Option<u64>,
}

/// Index definition for `createIndex`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexSpec {
    pub keys: Document,
    pub name: Option<String>,
    pub unique: Option<bool>,
    pub sparse: Option<bool>,
    pub expire_after: Option<Duration>,
}

/// A fully parsed `query` call against a collection.
#[derive(Debug, Clone, PartialEq)]
pub enum CollectionCall {
    InsertOne(Document),
    InsertMany(Vec<Document>),
    Find(FindSpec),
    FindOne(FindSpec),
    Update {
        filter: Document,
        update: Document,
        multi: bool,
        upsert: bool,
    },
    Delete {
        filter: Document,
        multi: bool,
    },
    CountDocuments(Document),
    Aggregate(Vec<Document>),
    Distinct {
        field: String,
        filter: Document,
    },
    CreateIndex(IndexSpec),
    Drop,
}

/// Target of a `query` statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Collection {
        collection: String,
        call: CollectionCall,
    },
    /// Database-level command document.
    Command(Document),
}

/// Parse a `query` statement and its positional params.
///
/// `"<collection>.<method>"` addresses a collection (the method is the
/// part after the last dot); anything without a dot is a database command
/// `{name: 1, ..params[0]}`.
pub fn parse_target(statement: &str, params: &[Value]) -> Result<Target> {
    let statement = statement.trim();
    match statement.rsplit_once('.') {
        Some((collection, method)) if !collection.is_empty() => {
            let method: CollectionMethod = method.parse()?;
            let call = parse_call(method, params)?;
            Ok(Target::Collection {
                collection: collection.to_string(),
                call,
            })
        }
        _ if !statement.is_empty() && !statement.contains('.') => {
            let mut command = Document::new();
            command.insert(statement, 1);
            if let Some(extra) = params.first() {
                for (key, value) in to_document(extra.clone(), "command arguments")? {
                    command.insert(key, value);
                }
            }
            Ok(Target::Command(command))
        }
        _ => Err(StoreError::unsupported(format!(
            "invalid document operation '{}'",
            statement
        ))),
    }
}

fn parse_call(method: CollectionMethod, params: &[Value]) -> Result<CollectionCall> {
    let call = match method {
        CollectionMethod::InsertOne => {
            CollectionCall::InsertOne(to_document(required(params, 0, "document")?, "document")?)
        }
        CollectionMethod::InsertMany => {
            CollectionCall::InsertMany(to_documents(required(params, 0, "documents")?, "documents")?)
        }
        CollectionMethod::Find => CollectionCall::Find(find_spec(params)?),
        CollectionMethod::FindOne => CollectionCall::FindOne(find_spec(params)?),
        CollectionMethod::UpdateOne | CollectionMethod::UpdateMany => {
            let options = object_param(params, 2)?;
            CollectionCall::Update {
                filter: to_document(required(params, 0, "filter")?, "filter")?,
                update: to_document(required(params, 1, "update")?, "update")?,
                multi: method == CollectionMethod::UpdateMany,
                upsert: bool_option(&options, "upsert").unwrap_or(false),
            }
        }
        CollectionMethod::DeleteOne | CollectionMethod::DeleteMany => CollectionCall::Delete {
            filter: optional_document(params, 0, "filter")?,
            multi: method == CollectionMethod::DeleteMany,
        },
        CollectionMethod::CountDocuments => {
            CollectionCall::CountDocuments(optional_document(params, 0, "filter")?)
        }
        CollectionMethod::Aggregate => {
            CollectionCall::Aggregate(to_documents(required(params, 0, "pipeline")?, "pipeline")?)
        }
        CollectionMethod::Distinct => {
            let field = match required(params, 0, "field")? {
                Value::String(field) => field,
                other => {
                    return Err(StoreError::unsupported(format!(
                        "distinct field must be a string, got {}",
                        other
                    )))
                }
            };
            CollectionCall::Distinct {
                field,
                filter: optional_document(params, 1, "filter")?,
            }
        }
        CollectionMethod::CreateIndex => {
            let keys = to_document(required(params, 0, "keys")?, "keys")?;
            CollectionCall::CreateIndex(index_spec(keys, &object_param(params, 1)?)?)
        }
        CollectionMethod::Drop => CollectionCall::Drop,
    };
    Ok(call)
}

fn find_spec(params: &[Value]) -> Result<FindSpec> {
    let options = object_param(params, 1)?;
    Ok(FindSpec {
        filter: optional_document(params, 0, "filter")?,
        sort: document_option(&options, "sort")?,
        projection: document_option(&options, "projection")?,
        limit: options.get("limit").and_then(Value::as_i64),
        skip: options.get("skip").and_then(Value::as_u64),
    })
}

fn index_spec(keys: Document, options: &Map<String, Value>) -> Result<IndexSpec> {
    if keys.is_empty() {
        return Err(StoreError::unsupported("index keys must not be empty"));
    }
    Ok(IndexSpec {
        keys,
        name: options
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string),
        unique: bool_option(options, "unique"),
        sparse: bool_option(options, "sparse"),
        expire_after: options
            .get("expireAfterSeconds")
            .and_then(Value::as_u64)
            .map(Duration::from_secs),
    })
}

/// Operation types accepted in a document operation-list file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Insert,
    Update,
    Delete,
    CreateIndex,
}

impl FromStr for OperationKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "insert" => Ok(OperationKind::Insert),
            "update" => Ok(OperationKind::Update),
            "delete" => Ok(OperationKind::Delete),
            "createIndex" => Ok(OperationKind::CreateIndex),
            other => Err(StoreError::unsupported(format!(
                "unsupported operation type '{}'",
                other
            ))),
        }
    }
}

/// One entry of an operation-list file, parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedOperation {
    pub kind: OperationKind,
    pub collection: String,
    pub call: CollectionCall,
}

/// Decode the outer operation list.
///
/// # Errors
///
/// Returns `StoreError::MalformedOperationFile` if the batch is not a JSON
/// array. Individual entries are parsed later so each can fail on its own.
pub fn parse_operation_list(batch: &str) -> Result<Vec<Value>> {
    match serde_json::from_str::<Value>(batch) {
        Ok(Value::Array(entries)) => Ok(entries),
        Ok(other) => Err(StoreError::MalformedOperationFile(format!(
            "expected a JSON array of operations, got {}",
            json_kind(&other)
        ))),
        Err(err) => Err(StoreError::MalformedOperationFile(err.to_string())),
    }
}

/// Human-readable label for an entry, used in results and logs.
pub fn operation_label(entry: &Value) -> String {
    let kind = entry.get("type").and_then(Value::as_str).unwrap_or("?");
    match entry.get("collection").and_then(Value::as_str) {
        Some(collection) => format!("{} {}", kind, collection),
        None => kind.to_string(),
    }
}

/// Parse one `{type, collection, data, options}` descriptor.
pub fn plan_operation(entry: &Value) -> Result<PlannedOperation> {
    let object = entry.as_object().ok_or_else(|| {
        StoreError::unsupported(format!("operation must be an object, got {}", json_kind(entry)))
    })?;
    let kind: OperationKind = object
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| StoreError::unsupported("operation is missing 'type'"))?
        .parse()?;
    let collection = object
        .get("collection")
        .and_then(Value::as_str)
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| StoreError::unsupported("operation is missing 'collection'"))?
        .to_string();
    let data = object.get("data").cloned().unwrap_or(Value::Null);
    let options = match object.get("options") {
        Some(Value::Object(options)) => options.clone(),
        Some(Value::Null) | None => Map::new(),
        Some(other) => {
            return Err(StoreError::unsupported(format!(
                "operation options must be an object, got {}",
                json_kind(other)
            )))
        }
    };
    let multi = bool_option(&options, "multi").unwrap_or(true);

    let call = match kind {
        OperationKind::Insert => match data {
            Value::Array(_) => CollectionCall::InsertMany(to_documents(data, "data")?),
            other => CollectionCall::InsertOne(to_document(other, "data")?),
        },
        OperationKind::Update => {
            let mut data = match data {
                Value::Object(data) => data,
                other => {
                    return Err(StoreError::unsupported(format!(
                        "update data must be an object with 'filter' and 'update', got {}",
                        json_kind(&other)
                    )))
                }
            };
            let filter = data.remove("filter").unwrap_or_else(|| Value::Object(Map::new()));
            let update = data
                .remove("update")
                .ok_or_else(|| StoreError::unsupported("update data is missing 'update'"))?;
            CollectionCall::Update {
                filter: to_document(filter, "filter")?,
                update: to_document(update, "update")?,
                multi,
                upsert: bool_option(&options, "upsert").unwrap_or(false),
            }
        }
        OperationKind::Delete => CollectionCall::Delete {
            filter: match data {
                Value::Null => Document::new(),
                other => to_document(other, "filter")?,
            },
            multi,
        },
        OperationKind::CreateIndex => {
            CollectionCall::CreateIndex(index_spec(to_document(data, "keys")?, &options)?)
        }
    };

    Ok(PlannedOperation {
        kind,
        collection,
        call,
    })
}

/// Convert JSON (including extended JSON such as `{"$oid": ...}`) to a BSON document.
pub fn to_document(value: Value, what: &str) -> Result<Document> {
    match Bson::try_from(value) {
        Ok(Bson::Document(document)) => Ok(document),
        Ok(other) => Err(StoreError::unsupported(format!(
            "{} must be a JSON object, got {:?}",
            what,
            other.element_type()
        ))),
        Err(err) => Err(StoreError::unsupported(format!("invalid {}: {}", what, err))),
    }
}

fn to_documents(value: Value, what: &str) -> Result<Vec<Document>> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .map(|item| to_document(item, what))
            .collect(),
        other => Err(StoreError::unsupported(format!(
            "{} must be a JSON array, got {}",
            what,
            json_kind(&other)
        ))),
    }
}

/// Convert BSON back to relaxed extended JSON.
pub fn to_json(value: Bson) -> Value {
    value.into_relaxed_extjson()
}

pub fn document_to_json(document: Document) -> Value {
    to_json(Bson::Document(document))
}

fn required(params: &[Value], index: usize, what: &str) -> Result<Value> {
    params
        .get(index)
        .cloned()
        .ok_or_else(|| StoreError::unsupported(format!("missing {} argument", what)))
}

fn optional_document(params: &[Value], index: usize, what: &str) -> Result<Document> {
    match params.get(index) {
        None | Some(Value::Null) => Ok(Document::new()),
        Some(value) => to_document(value.clone(), what),
    }
}

fn object_param(params: &[Value], index: usize) -> Result<Map<String, Value>> {
    match params.get(index) {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(options)) => Ok(options.clone()),
        Some(other) => Err(StoreError::unsupported(format!(
            "options must be a JSON object, got {}",
            json_kind(other)
        ))),
    }
}

fn document_option(options: &Map<String, Value>, key: &str) -> Result<Option<Document>> {
    options
        .get(key)
        .map(|value| to_document(value.clone(), key))
        .transpose()
}

fn bool_option(options: &Map<String, Value>, key: &str) -> Option<bool> {
    options.get(key).and_then(Value::as_bool)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
