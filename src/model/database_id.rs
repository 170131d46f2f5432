/// Fully-qualified database identity: project plus database name.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DatabaseId {
    project_id: String,
    database: String,
}

pub const DEFAULT_DATABASE: &str = "(default)";

impl DatabaseId {
    pub fn new(project_id: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            database: database.into(),
        }
    }

    pub fn default_database(project_id: impl Into<String>) -> Self {
        Self::new(project_id, DEFAULT_DATABASE)
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn database(&self) -> &str {
        &self.database
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_database_name() {
        let id = DatabaseId::default_database("demo");
        assert_eq!(id.project_id(), "demo");
        assert_eq!(id.database(), DEFAULT_DATABASE);
    }
}
