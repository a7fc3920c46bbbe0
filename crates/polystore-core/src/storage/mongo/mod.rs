//! MongoDB engine, built on the synchronous `mongodb` driver.
//!
//! One `ClientSession` is kept for the lifetime of a transaction and
//! reused across begin/commit/rollback; every operation issued while a
//! transaction is open runs inside it.

pub mod operations;

use std::io::Write;
use std::path::{Path, PathBuf};

use mongodb::bson::{doc, Bson, Document};
use mongodb::options::IndexOptions;
use mongodb::sync::{Client, ClientSession, Collection, Database};
use mongodb::IndexModel;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde_json::{json, Value};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use self::operations::{
    document_to_json, operation_label, parse_operation_list, parse_target, plan_operation, to_json,
    CollectionCall, FindSpec, IndexSpec, Target,
};
use super::tools::ToolCommand;
use super::traits::StorageEngine;
use super::types::{BatchGuard, DocumentCounters, OperationResult, Outcome};
use crate::config::{EngineConfig, EngineKind};
use crate::error::{Result, StoreError};
use crate::fs::backup_timestamp;
use crate::storage::retry::connect_with_retry;

const DEFAULT_DUMP_TOOL: &str = "mongodump";
const DEFAULT_RESTORE_TOOL: &str = "mongorestore";
const TOOL_OPTIONS: [&str; 2] = ["dump_tool", "restore_tool"];

/// Run a driver action inside the session when one is given.
macro_rules! in_session {
    ($session:expr, $action:expr) => {
        match $session {
            Some(session) => $action.session(session).run(),
            None => $action.run(),
        }
    };
}

/// MongoDB storage engine.
pub struct MongoEngine {
    config: EngineConfig,
    client: Option<Client>,
    session: Option<ClientSession>,
    in_transaction: bool,
    connected: bool,
}

impl MongoEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            client: None,
            session: None,
            in_transaction: false,
            connected: false,
        }
    }

    /// Connection string assembled from the configuration.
    ///
    /// Credentials and option values are percent-encoded; the timeout is
    /// applied to both connecting and server selection.
    pub fn connection_uri(&self) -> String {
        let mut uri = String::from("mongodb://");
        if let Some(username) = self.username() {
            uri.push_str(&encode(username));
            if let Some(password) = self.config.password_str() {
                uri.push(':');
                uri.push_str(&encode(password));
            }
            uri.push('@');
        }
        uri.push_str(&self.address());
        uri.push('/');
        uri.push_str(&encode(self.config.database.trim()));
        uri.push('?');
        uri.push_str(&self.query_string(&[]));
        uri
    }

    /// Connection string for mongodump/mongorestore.
    ///
    /// Carries neither the database path nor credentials: the tools read a
    /// database in the URI as an implicit `--db`, and the password goes
    /// through a `--config` file instead of argv.
    pub fn tool_uri(&self) -> String {
        format!(
            "mongodb://{}/?{}",
            self.address(),
            self.query_string(&["authSource"])
        )
    }

    fn username(&self) -> Option<&str> {
        self.config.username.as_deref().filter(|u| !u.is_empty())
    }

    fn address(&self) -> String {
        match self.config.effective_port() {
            Some(port) => format!("{}:{}", self.config.host.trim(), port),
            None => self.config.host.trim().to_string(),
        }
    }

    fn query_string(&self, skip: &[&str]) -> String {
        let timeout_ms = self.config.timeout().as_millis();
        let mut query = vec![
            format!("connectTimeoutMS={}", timeout_ms),
            format!("serverSelectionTimeoutMS={}", timeout_ms),
        ];
        for (key, value) in &self.config.options {
            if TOOL_OPTIONS.contains(&key.as_str()) || skip.contains(&key.as_str()) {
                continue;
            }
            query.push(format!("{}={}", encode(key), encode(value)));
        }
        query.join("&")
    }

    /// Database the tools authenticate against; matches the driver's default.
    fn auth_database(&self) -> String {
        self.config
            .options
            .get("authSource")
            .cloned()
            .unwrap_or_else(|| self.config.database.trim().to_string())
    }

    /// YAML file holding the password for the tools' `--config` flag.
    fn tool_credentials(&self) -> Result<Option<NamedTempFile>> {
        let password = match (self.username(), self.config.password_str()) {
            (Some(_), Some(password)) => password,
            _ => return Ok(None),
        };
        let mut file = tempfile::Builder::new()
            .prefix("polystore-mongo-")
            .suffix(".yaml")
            .tempfile()?;
        writeln!(file, "password: {}", serde_json::to_string(password)?)?;
        file.flush()?;
        Ok(Some(file))
    }

    fn tool_command(&self, program: String, credentials: Option<&Path>) -> ToolCommand {
        let mut command = ToolCommand::new(program).arg(format!("--uri={}", self.tool_uri()));
        if let Some(username) = self.username() {
            command = command
                .arg(format!("--username={}", username))
                .arg(format!("--authenticationDatabase={}", self.auth_database()));
        }
        if let Some(path) = credentials {
            command = command.arg(format!("--config={}", path.display()));
        }
        command
    }

    fn client(&mut self) -> Result<&Client> {
        if self.client.is_none() {
            self.connect()?;
        }
        self.client
            .as_ref()
            .ok_or_else(|| StoreError::Transaction("MongoDB client unavailable".to_string()))
    }

    /// Handle on the configured database, connecting first if needed.
    pub fn database(&mut self) -> Result<Database> {
        let name = self.config.database.trim().to_string();
        Ok(self.client()?.database(&name))
    }

    /// Database handle plus the open transaction session, if any.
    fn context(&mut self) -> Result<(Database, Option<&mut ClientSession>)> {
        let database = self.database()?;
        let session = if self.in_transaction {
            self.session.as_mut()
        } else {
            None
        };
        Ok((database, session))
    }

    fn tool(&self, option: &str, default: &str) -> String {
        self.config
            .options
            .get(option)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }

    /// `mongodump` invocation writing into `destination`.
    pub fn dump_command(&self, destination: &Path, credentials: Option<&Path>) -> ToolCommand {
        self.tool_command(self.tool("dump_tool", DEFAULT_DUMP_TOOL), credentials)
            .arg(format!("--db={}", self.config.database.trim()))
            .arg(format!("--out={}", destination.display()))
    }

    /// `mongorestore` invocation replacing the database from the dump root `source`.
    pub fn restore_command(&self, source: &Path, credentials: Option<&Path>) -> ToolCommand {
        self.tool_command(self.tool("restore_tool", DEFAULT_RESTORE_TOOL), credentials)
            .arg("--drop")
            .arg(format!("--nsInclude={}.*", self.config.database.trim()))
            .arg(source.display().to_string())
    }
}

impl StorageEngine for MongoEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Mongodb
    }

    fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn connect(&mut self) -> Result<()> {
        if self.client.is_some() {
            return Ok(());
        }
        self.config.validate()?;
        let uri = self.connection_uri();

        let client = connect_with_retry(&self.config, || -> mongodb::error::Result<Client> {
            let client = Client::with_uri_str(&uri)?;
            client.database("admin").run_command(doc! { "ping": 1 }).run()?;
            Ok(client)
        })?;
        self.client = Some(client);
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) {
        if self.in_transaction {
            if let Some(session) = self.session.as_mut() {
                if let Err(err) = session.abort_transaction().run() {
                    warn!(engine = "MongoDB", error = %err, "failed to abort open transaction");
                }
            }
        }
        self.session = None;
        self.in_transaction = false;
        self.client = None;
        self.connected = false;
    }

    fn is_connected(&mut self) -> bool {
        self.connected = match self.client.as_ref() {
            Some(client) => client
                .database("admin")
                .run_command(doc! { "ping": 1 })
                .run()
                .is_ok(),
            None => false,
        };
        self.connected
    }

    fn query(&mut self, statement: &str, params: &[Value]) -> Result<Value> {
        let target = parse_target(statement, params)?;
        let (database, session) = self.context()?;
        match target {
            Target::Command(command) => {
                debug!(engine = "MongoDB", command = %command, "running database command");
                let reply = in_session!(session, database.run_command(command))?;
                Ok(document_to_json(reply))
            }
            Target::Collection { collection, call } => {
                let collection = database.collection::<Document>(&collection);
                execute_call(&collection, call, session)
            }
        }
    }

    fn execute_multiple(&mut self, batch: &str) -> Result<Vec<OperationResult>> {
        let entries = parse_operation_list(batch)?;
        let mode = self.config.batch_mode;
        let (database, mut session) = self.context()?;
        let mut guard = BatchGuard::new(mode);

        let mut results = Vec::with_capacity(entries.len());
        for (index, entry) in entries.iter().enumerate() {
            let label = operation_label(entry);
            if guard.halted() {
                results.push(OperationResult::skipped(index, label));
                continue;
            }
            debug!(engine = "MongoDB", index = index, operation = %label, "executing operation");

            let outcome = plan_operation(entry).and_then(|planned| {
                let collection = database.collection::<Document>(&planned.collection);
                execute_counted(&collection, planned.call, session.as_deref_mut())
            });
            let result = match outcome {
                Ok(counters) => OperationResult::ok(index, label, Outcome::Document(counters)),
                Err(err) => {
                    warn!(engine = "MongoDB", index = index, error = %err, "operation failed");
                    OperationResult::failed(index, label, err.to_string())
                }
            };
            results.push(guard.record(result));
        }
        Ok(results)
    }

    fn begin_transaction(&mut self) -> Result<()> {
        if self.in_transaction {
            return Err(StoreError::Transaction(
                "a transaction is already active".to_string(),
            ));
        }
        if self.session.is_none() {
            let session = self.client()?.start_session().run()?;
            self.session = Some(session);
        }
        if let Some(session) = self.session.as_mut() {
            session.start_transaction().run()?;
        }
        self.in_transaction = true;
        info!(engine = "MongoDB", "transaction started");
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        let session = match self.session.as_mut() {
            Some(session) if self.in_transaction => session,
            _ => return Err(StoreError::Transaction("no active transaction".to_string())),
        };
        session.commit_transaction().run()?;
        self.in_transaction = false;
        info!(engine = "MongoDB", "transaction committed");
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        let session = match self.session.as_mut() {
            Some(session) if self.in_transaction => session,
            _ => return Err(StoreError::Transaction("no active transaction".to_string())),
        };
        session.abort_transaction().run()?;
        self.in_transaction = false;
        info!(engine = "MongoDB", "transaction rolled back");
        Ok(())
    }

    fn last_insert_id(&mut self) -> Result<Option<i64>> {
        Ok(None)
    }

    fn backup(&mut self, name: Option<&str>) -> Result<PathBuf> {
        self.config.validate()?;
        let name = name.map(str::to_string).unwrap_or_else(backup_timestamp);
        let destination = self.backups_dir().join(name);
        std::fs::create_dir_all(&destination)?;

        let credentials = self.tool_credentials()?;
        let credentials_path = credentials.as_ref().map(|file| file.path());
        self.dump_command(&destination, credentials_path).run(None)?;
        info!(engine = "MongoDB", path = %destination.display(), "backup written");
        Ok(destination)
    }

    fn restore(&mut self, path: &Path) -> Result<bool> {
        self.config.validate()?;
        if !path.is_dir() {
            return Err(StoreError::DirectoryNotFound(path.to_path_buf()));
        }
        let credentials = self.tool_credentials()?;
        let credentials_path = credentials.as_ref().map(|file| file.path());
        self.restore_command(path, credentials_path).run(None)?;
        info!(engine = "MongoDB", path = %path.display(), "database restored");
        Ok(true)
    }
}

fn execute_call(
    collection: &Collection<Document>,
    call: CollectionCall,
    mut session: Option<&mut ClientSession>,
) -> Result<Value> {
    let value = match call {
        CollectionCall::Find(spec) => {
            let documents = find_documents(collection, spec, session)?;
            Value::Array(documents.into_iter().map(document_to_json).collect())
        }
        CollectionCall::FindOne(spec) => {
            let mut action = collection.find_one(spec.filter);
            if let Some(sort) = spec.sort {
                action = action.sort(sort);
            }
            if let Some(projection) = spec.projection {
                action = action.projection(projection);
            }
            if let Some(skip) = spec.skip {
                action = action.skip(skip);
            }
            let document = in_session!(session.as_deref_mut(), action)?;
            document.map(document_to_json).unwrap_or(Value::Null)
        }
        CollectionCall::CountDocuments(filter) => {
            let count = in_session!(session, collection.count_documents(filter))?;
            json!(count)
        }
        CollectionCall::Aggregate(pipeline) => {
            let documents = aggregate_documents(collection, pipeline, session)?;
            Value::Array(documents.into_iter().map(document_to_json).collect())
        }
        CollectionCall::Distinct { field, filter } => {
            let values = in_session!(session, collection.distinct(&field, filter))?;
            Value::Array(values.into_iter().map(to_json).collect())
        }
        CollectionCall::Drop => {
            in_session!(session, collection.drop())?;
            json!({ "dropped": true })
        }
        CollectionCall::InsertOne(document) => {
            let result = in_session!(session, collection.insert_one(&document))?;
            json!({ "inserted_id": to_json(result.inserted_id) })
        }
        CollectionCall::InsertMany(documents) => {
            let result = in_session!(session, collection.insert_many(&documents))?;
            let mut ids: Vec<(usize, Bson)> = result.inserted_ids.into_iter().collect();
            ids.sort_by_key(|(index, _)| *index);
            json!({ "inserted_ids": ids.into_iter().map(|(_, id)| to_json(id)).collect::<Vec<_>>() })
        }
        call @ (CollectionCall::Update { .. }
        | CollectionCall::Delete { .. }
        | CollectionCall::CreateIndex(_)) => {
            let counters = execute_counted(collection, call, session)?;
            serde_json::to_value(counters)?
        }
    };
    Ok(value)
}

/// Run a modifying call and report its counters.
fn execute_counted(
    collection: &Collection<Document>,
    call: CollectionCall,
    session: Option<&mut ClientSession>,
) -> Result<DocumentCounters> {
    let mut counters = DocumentCounters::default();
    match call {
        CollectionCall::InsertOne(document) => {
            let result = in_session!(session, collection.insert_one(&document))?;
            counters.inserted = 1;
            debug!(engine = "MongoDB", id = %result.inserted_id, "inserted document");
        }
        CollectionCall::InsertMany(documents) => {
            let result = in_session!(session, collection.insert_many(&documents))?;
            counters.inserted = result.inserted_ids.len() as u64;
        }
        CollectionCall::Update {
            filter,
            update,
            multi,
            upsert,
        } => {
            let result = if multi {
                in_session!(
                    session,
                    collection
                        .update_many(filter, update)
                        .upsert(upsert)
                )?
            } else {
                in_session!(
                    session,
                    collection
                        .update_one(filter, update)
                        .upsert(upsert)
                )?
            };
            counters.matched = result.matched_count;
            counters.modified = result.modified_count;
            counters.upserted_id = result.upserted_id.map(to_json);
        }
        CollectionCall::Delete { filter, multi } => {
            let result = if multi {
                in_session!(session, collection.delete_many(filter))?
            } else {
                in_session!(session, collection.delete_one(filter))?
            };
            counters.deleted = result.deleted_count;
        }
        CollectionCall::CreateIndex(spec) => {
            let model = index_model(spec);
            let result = in_session!(session, collection.create_index(model))?;
            counters.index_name = Some(result.index_name);
        }
        other => {
            return Err(StoreError::unsupported(format!(
                "{:?} does not produce document counters",
                other
            )))
        }
    }
    Ok(counters)
}

fn find_documents(
    collection: &Collection<Document>,
    spec: FindSpec,
    session: Option<&mut ClientSession>,
) -> Result<Vec<Document>> {
    let mut action = collection.find(spec.filter);
    if let Some(sort) = spec.sort {
        action = action.sort(sort);
    }
    if let Some(projection) = spec.projection {
        action = action.projection(projection);
    }
    if let Some(limit) = spec.limit {
        action = action.limit(limit);
    }
    if let Some(skip) = spec.skip {
        action = action.skip(skip);
    }

    match session {
        Some(session) => {
            let mut cursor = action.session(&mut *session).run()?;
            let mut documents = Vec::new();
            while let Some(document) = cursor.next(&mut *session) {
                documents.push(document?);
            }
            Ok(documents)
        }
        None => Ok(action.run()?.collect::<mongodb::error::Result<Vec<_>>>()?),
    }
}

fn aggregate_documents(
    collection: &Collection<Document>,
    pipeline: Vec<Document>,
    session: Option<&mut ClientSession>,
) -> Result<Vec<Document>> {
    match session {
        Some(session) => {
            let mut cursor = collection.aggregate(pipeline).session(&mut *session).run()?;
            let mut documents = Vec::new();
            while let Some(document) = cursor.next(&mut *session) {
                documents.push(document?);
            }
            Ok(documents)
        }
        None => Ok(collection
            .aggregate(pipeline)
            .run()?
            .collect::<mongodb::error::Result<Vec<_>>>()?),
    }
}

fn index_model(spec: IndexSpec) -> IndexModel {
    let mut options = IndexOptions::default();
    options.name = spec.name;
    options.unique = spec.unique;
    options.sparse = spec.sparse;
    options.expire_after = spec.expire_after;

    IndexModel::builder().keys(spec.keys).options(options).build()
}

fn encode(value: &str) -> String {
    utf8_percent_encode(value, NON_ALPHANUMERIC).to_string()
}
