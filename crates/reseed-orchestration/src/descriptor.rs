//! Static service descriptors built from the configured service table

use reseed_config::{Config, SchemaDef, ServiceDef, ToolKind};
use serde::Serialize;

/// Migration tool family a service uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationTool {
    /// Node services migrating with prisma
    Prisma,
    /// Python services migrating with alembic
    Alembic,
}

impl From<ToolKind> for MigrationTool {
    fn from(kind: ToolKind) -> Self {
        match kind {
            ToolKind::Prisma => MigrationTool::Prisma,
            ToolKind::Alembic => MigrationTool::Alembic,
        }
    }
}

impl MigrationTool {
    /// Command that proves the tool is installed in the execution context
    pub fn version_command(&self) -> String {
        match self {
            MigrationTool::Prisma => "npx prisma --version".to_string(),
            MigrationTool::Alembic => "alembic --version".to_string(),
        }
    }

    /// Apply every pending migration for a schema
    pub fn apply_command(&self, schema: &SchemaRef) -> String {
        match self {
            MigrationTool::Prisma => {
                format!("npx prisma migrate deploy --schema {}", schema.migrations)
            }
            MigrationTool::Alembic => format!("alembic -c {} upgrade head", schema.migrations),
        }
    }

    /// Destructive reset of a schema; local mode only
    pub fn reset_command(&self, schema: &SchemaRef) -> String {
        match self {
            MigrationTool::Prisma => format!(
                "npx prisma migrate reset --force --skip-seed --skip-generate --schema {}",
                schema.migrations
            ),
            MigrationTool::Alembic => format!("alembic -c {} downgrade base", schema.migrations),
        }
    }

    /// Read-only `SELECT 1` against the datastore named by `connection_env`
    pub fn probe_command(&self, connection_env: &str) -> String {
        match self {
            MigrationTool::Prisma => format!(
                "printf 'SELECT 1;' | npx prisma db execute --stdin --url \"${}\"",
                connection_env
            ),
            MigrationTool::Alembic => format!(
                "python -c \"import os, sqlalchemy; \
                 sqlalchemy.create_engine(os.environ['{}']).connect().execute(sqlalchemy.text('SELECT 1'))\"",
                connection_env
            ),
        }
    }
}

impl std::fmt::Display for MigrationTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MigrationTool::Prisma => write!(f, "prisma"),
            MigrationTool::Alembic => write!(f, "alembic"),
        }
    }
}

/// A schema a service migrates against
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaRef {
    /// Schema name
    pub name: String,
    /// Configuration key holding the connection string
    pub connection_env: String,
    /// Migration location passed to the tool
    pub migrations: String,
    /// Owning service when the schema is shared
    pub shared_from: Option<String>,
}

impl SchemaRef {
    /// True when this service owns the schema and may drop it
    pub fn is_owned(&self) -> bool {
        self.shared_from.is_none()
    }
}

impl From<&SchemaDef> for SchemaRef {
    fn from(def: &SchemaDef) -> Self {
        Self {
            name: def.name.clone(),
            connection_env: def.connection_env.clone(),
            migrations: def.migrations.clone(),
            shared_from: def.shared_from.clone(),
        }
    }
}

/// Everything the orchestrator needs to know about one service
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceDescriptor {
    /// Service name
    pub name: String,
    /// Migration tool family
    pub tool: MigrationTool,
    /// Schemas in migration order
    pub schemas: Vec<SchemaRef>,
    /// Seed entry point
    pub seed_command: String,
    /// Extra configuration keys the service needs
    pub required_keys: Vec<String>,
    /// Working directory inside the pod
    pub workdir: String,
    /// Directory under the local workspace root, when it differs from the name
    pub directory: Option<String>,
    /// Configuration file materialised before migrating
    pub env_file: String,
}

impl ServiceDescriptor {
    /// Connection keys for every schema followed by the extra required keys
    pub fn required_config_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = Vec::new();
        let declared = self
            .schemas
            .iter()
            .map(|schema| &schema.connection_env)
            .chain(self.required_keys.iter());
        for key in declared {
            if !keys.contains(key) {
                keys.push(key.clone());
            }
        }
        keys
    }

    /// Schemas this service owns
    pub fn owned_schemas(&self) -> impl Iterator<Item = &SchemaRef> {
        self.schemas.iter().filter(|schema| schema.is_owned())
    }

    /// Owner of a shared schema this service migrates against, if any
    pub fn shared_dependency(&self) -> Option<&str> {
        self.schemas
            .iter()
            .find_map(|schema| schema.shared_from.as_deref())
    }

    /// True when any schema is owned by another service
    pub fn requires_shared_schema(&self) -> bool {
        self.shared_dependency().is_some()
    }

    /// Schema used for the pre-flight connectivity probe
    pub fn probe_schema(&self) -> Option<&SchemaRef> {
        self.schemas.first()
    }

    /// Local workspace directory name
    pub fn directory_name(&self) -> &str {
        self.directory.as_deref().unwrap_or(&self.name)
    }
}

impl From<&ServiceDef> for ServiceDescriptor {
    fn from(def: &ServiceDef) -> Self {
        Self {
            name: def.name.clone(),
            tool: def.tool.into(),
            schemas: def.schemas.iter().map(SchemaRef::from).collect(),
            seed_command: def.seed.clone(),
            required_keys: def.required_keys.clone(),
            workdir: def.workdir.clone(),
            directory: def.directory.clone(),
            env_file: def.env_file.clone(),
        }
    }
}

/// The declarative service table, in configured order
#[derive(Debug, Clone, Default)]
pub struct ServiceCatalog {
    services: Vec<ServiceDescriptor>,
}

impl ServiceCatalog {
    /// Build the catalog from a validated configuration
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.services.iter().map(ServiceDescriptor::from).collect())
    }

    /// Build a catalog from descriptors
    pub fn new(services: Vec<ServiceDescriptor>) -> Self {
        Self { services }
    }

    /// Look up a service by name
    pub fn get(&self, name: &str) -> Option<&ServiceDescriptor> {
        self.services.iter().find(|service| service.name == name)
    }

    /// Services in table order
    pub fn iter(&self) -> impl Iterator<Item = &ServiceDescriptor> {
        self.services.iter()
    }

    /// Service names in table order
    pub fn names(&self) -> Vec<&str> {
        self.services.iter().map(|s| s.name.as_str()).collect()
    }

    /// Number of services
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// True when the catalog has no services
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}
