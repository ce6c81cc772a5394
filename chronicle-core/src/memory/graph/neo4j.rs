//! Neo4j over the HTTP transactional Cypher endpoint.
//!
//! Every call is one auto-committed transaction
//! (`POST {uri}/db/{database}/tx/commit`). Values always travel as
//! parameters; only normalized label and relation tokens are spliced into
//! statement text, and those are backtick-quoted.

use super::backend::{EdgeTriple, EntityNode, GraphBackend, GraphError};
use super::token::{Label, RelationType, DEFAULT_LABEL};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};

/// Property holding the entity type (last write wins).
const TYPE_PROPERTY: &str = "entity_type";

const DEFAULT_DATABASE: &str = "neo4j";
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Connection settings for [`Neo4jGraph`].
#[derive(Debug, Clone)]
pub struct Neo4jConfig {
    /// HTTP(S) base URL, e.g. `http://localhost:7474`.
    pub uri: String,
    pub database: String,
    pub user: String,
    pub password: String,
    pub timeout: Duration,
}

impl Neo4jConfig {
    pub fn new(
        uri: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            uri: uri.into(),
            database: DEFAULT_DATABASE.to_string(),
            user: user.into(),
            password: password.into(),
            timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
        }
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// World graph stored in a Neo4j database.
pub struct Neo4jGraph {
    client: reqwest::Client,
    endpoint: String,
    user: String,
    password: String,
}

impl Neo4jGraph {
    pub fn new(config: Neo4jConfig) -> Result<Self, GraphError> {
        let uri = config.uri.trim_end_matches('/');
        if !(uri.starts_with("http://") || uri.starts_with("https://")) {
            return Err(GraphError::Config(format!(
                "NEO4J_URI must be an http(s) URL for the HTTP API, got {uri}"
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.timeout)
            .build()
            .map_err(|e| GraphError::Config(e.to_string()))?;

        let endpoint = format!("{uri}/db/{}/tx/commit", config.database);
        info!(%endpoint, "using Neo4j graph store");

        Ok(Self {
            client,
            endpoint,
            user: config.user,
            password: config.password,
        })
    }

    async fn run(&self, statement: Statement) -> Result<Vec<Vec<Value>>, GraphError> {
        debug!(statement = %statement.statement, "cypher");
        let body = TxRequest {
            statements: vec![statement],
        };

        let response = self
            .client
            .post(&self.endpoint)
            .basic_auth(&self.user, Some(&self.password))
            .json(&body)
            .send()
            .await
            .map_err(|e| GraphError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            return Err(GraphError::Unavailable(format!("HTTP {status}: {text}")));
        }

        let tx: TxResponse = response
            .json()
            .await
            .map_err(|e| GraphError::Parse(e.to_string()))?;
        tx.into_rows()
    }
}

#[async_trait]
impl GraphBackend for Neo4jGraph {
    async fn merge_node(
        &mut self,
        name: &str,
        label: &Label,
        attributes: &BTreeMap<String, String>,
    ) -> Result<(), GraphError> {
        self.run(merge_node_statement(name, label, attributes)).await?;
        Ok(())
    }

    async fn merge_edge(
        &mut self,
        source: &str,
        relation: &RelationType,
        target: &str,
    ) -> Result<(), GraphError> {
        self.run(merge_edge_statement(source, relation, target)).await?;
        Ok(())
    }

    async fn incident_edges(
        &self,
        name: &str,
        limit: usize,
    ) -> Result<Vec<EdgeTriple>, GraphError> {
        let statement = Statement::new(
            format!(
                "MATCH (n:{DEFAULT_LABEL} {{name: $name}})-[r]-() \
                 WITH DISTINCT r LIMIT $limit \
                 WITH startNode(r) AS a, r, endNode(r) AS b \
                 {EDGE_RETURN}"
            ),
            json!({ "name": name, "limit": limit }),
        );
        self.run(statement).await?.iter().map(|row| parse_triple(row)).collect()
    }

    async fn edges(&self, limit: usize) -> Result<Vec<EdgeTriple>, GraphError> {
        let statement = Statement::new(
            format!("MATCH (a)-[r]->(b) {EDGE_RETURN} LIMIT $limit"),
            json!({ "limit": limit }),
        );
        self.run(statement).await?.iter().map(|row| parse_triple(row)).collect()
    }

    async fn node(&self, name: &str) -> Result<Option<EntityNode>, GraphError> {
        let statement = Statement::new(
            format!("MATCH (n:{DEFAULT_LABEL} {{name: $name}}) RETURN properties(n) LIMIT 1"),
            json!({ "name": name }),
        );
        let rows = self.run(statement).await?;
        rows.first()
            .and_then(|row| row.first())
            .map(parse_node)
            .transpose()
    }

    async fn edge_count(&self) -> Result<usize, GraphError> {
        let rows = self
            .run(Statement::new("MATCH ()-[r]->() RETURN count(r)", json!({})))
            .await?;
        rows.first()
            .and_then(|row| row.first())
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .ok_or_else(|| GraphError::Parse("missing edge count".to_string()))
    }

    async fn clear(&mut self) -> Result<(), GraphError> {
        self.run(Statement::new("MATCH (n) DETACH DELETE n", json!({})))
            .await?;
        info!("graph database cleared");
        Ok(())
    }
}

const EDGE_RETURN: &str = "RETURN coalesce(a.entity_type, 'Entity'), a.name, type(r), \
                           coalesce(b.entity_type, 'Entity'), b.name";

/// Every node carries the base `Entity` label so MERGE-by-name matches
/// regardless of type; the type is stored as a property and as a label.
fn merge_node_statement(
    name: &str,
    label: &Label,
    attributes: &BTreeMap<String, String>,
) -> Statement {
    Statement::new(
        format!(
            "MERGE (n:{DEFAULT_LABEL} {{name: $name}}) \
             SET n:`{label}`, n.{TYPE_PROPERTY} = $label, n += $props"
        ),
        json!({ "name": name, "label": label.as_str(), "props": attributes }),
    )
}

fn merge_edge_statement(source: &str, relation: &RelationType, target: &str) -> Statement {
    Statement::new(
        format!(
            "MERGE (a:{DEFAULT_LABEL} {{name: $source}}) \
             MERGE (b:{DEFAULT_LABEL} {{name: $target}}) \
             MERGE (a)-[:`{relation}`]->(b)"
        ),
        json!({ "source": source, "target": target }),
    )
}

fn parse_triple(row: &[Value]) -> Result<EdgeTriple, GraphError> {
    let field = |i: usize| -> Result<String, GraphError> {
        row.get(i)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| GraphError::Parse(format!("edge row column {i} is not a string")))
    };
    Ok(EdgeTriple {
        source_type: field(0)?,
        source: field(1)?,
        relation: field(2)?,
        target_type: field(3)?,
        target: field(4)?,
    })
}

fn parse_node(properties: &Value) -> Result<EntityNode, GraphError> {
    let map = properties
        .as_object()
        .ok_or_else(|| GraphError::Parse("node properties are not a map".to_string()))?;
    let name = map
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| GraphError::Parse("node without a name".to_string()))?
        .to_string();
    let label = map
        .get(TYPE_PROPERTY)
        .and_then(Value::as_str)
        .map(Label::normalize);
    let attributes = map
        .iter()
        .filter(|(k, _)| k.as_str() != "name" && k.as_str() != TYPE_PROPERTY)
        .map(|(k, v)| {
            let value = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), value)
        })
        .collect();

    Ok(EntityNode {
        name,
        label,
        attributes,
    })
}

#[derive(Debug, Serialize)]
struct Statement {
    statement: String,
    parameters: Value,
}

impl Statement {
    fn new(statement: impl Into<String>, parameters: Value) -> Self {
        Self {
            statement: statement.into(),
            parameters,
        }
    }
}

#[derive(Debug, Serialize)]
struct TxRequest {
    statements: Vec<Statement>,
}

#[derive(Debug, Deserialize)]
struct TxResponse {
    #[serde(default)]
    results: Vec<TxResult>,
    #[serde(default)]
    errors: Vec<TxError>,
}

#[derive(Debug, Deserialize)]
struct TxResult {
    #[serde(default)]
    data: Vec<TxRow>,
}

#[derive(Debug, Deserialize)]
struct TxRow {
    row: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct TxError {
    code: String,
    message: String,
}

impl TxResponse {
    fn into_rows(self) -> Result<Vec<Vec<Value>>, GraphError> {
        if let Some(err) = self.errors.into_iter().next() {
            return Err(GraphError::Query(format!("{}: {}", err.code, err.message)));
        }
        Ok(self
            .results
            .into_iter()
            .flat_map(|r| r.data.into_iter().map(|d| d.row))
            .collect())
    }
}
