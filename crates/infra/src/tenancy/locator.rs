//! Datastore locators: which database a tenant's data lives in.
//!
//! A locator is a full connection URL rendered from a template such as
//! `postgres://user:pw@host:5432/{database}`.

use std::fmt;

use crate::error::ProvisioningError;

pub const DATABASE_PLACEHOLDER: &str = "{database}";

const DATABASE_PREFIX: &str = "tenant_";
const MAX_DATABASE_NAME: usize = 63;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatastoreLocator {
    database: String,
    url: String,
}

impl DatastoreLocator {
    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Recover a locator from a stored URL; the database is the last path
    /// segment (query string ignored).
    pub fn from_url(url: &str) -> Result<Self, ProvisioningError> {
        let url = url.trim();
        let without_query = url.split(['?', '#']).next().unwrap_or_default();
        let database = without_query
            .rsplit_once('/')
            .map(|(_, db)| db)
            .filter(|db| !db.is_empty() && !db.contains(':') && !db.contains('@'))
            .ok_or_else(|| ProvisioningError::InvalidLocator(url.to_string()))?;
        validate_database_name(database)?;
        Ok(Self {
            database: database.to_string(),
            url: url.to_string(),
        })
    }
}

impl fmt::Display for DatastoreLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatorTemplate(String);

impl LocatorTemplate {
    pub fn new(template: impl Into<String>) -> Result<Self, ProvisioningError> {
        let template = template.into();
        if template.matches(DATABASE_PLACEHOLDER).count() != 1 {
            return Err(ProvisioningError::InvalidLocator(format!(
                "template must contain {DATABASE_PLACEHOLDER} exactly once: {template}"
            )));
        }
        Ok(Self(template))
    }

    /// Locator for a tenant: the explicit database name when given (must
    /// already be valid), otherwise one derived from the identifier.
    pub fn build(
        &self,
        identifier: &str,
        database_override: Option<&str>,
    ) -> Result<DatastoreLocator, ProvisioningError> {
        let database = match database_override.map(str::trim) {
            Some(name) => {
                validate_database_name(name)?;
                name.to_string()
            }
            None => database_name_for(identifier),
        };
        Ok(DatastoreLocator {
            url: self.0.replace(DATABASE_PLACEHOLDER, &database),
            database,
        })
    }
}

/// `tenant_<identifier>`, lowercased, anything outside `[a-z0-9_]` replaced
/// by `_`, cut to 63 bytes.
pub fn database_name_for(identifier: &str) -> String {
    let mut name: String = DATABASE_PREFIX.to_string();
    name.extend(identifier.trim().chars().map(|c| {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' {
            c
        } else {
            '_'
        }
    }));
    name.truncate(MAX_DATABASE_NAME);
    name
}

pub fn validate_database_name(name: &str) -> Result<(), ProvisioningError> {
    let valid = !name.is_empty()
        && name.len() <= MAX_DATABASE_NAME
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_');
    if valid {
        Ok(())
    } else {
        Err(ProvisioningError::InvalidLocator(format!(
            "database name '{name}' must match [a-z0-9_]{{1,{MAX_DATABASE_NAME}}}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn template() -> LocatorTemplate {
        LocatorTemplate::new("postgres://u:p@db:5432/{database}").unwrap()
    }

    #[test]
    fn derived_names_are_prefixed_and_sanitized() {
        assert_eq!(database_name_for("Acme-Corp"), "tenant_acme_corp");
        assert_eq!(database_name_for(" a.b c "), "tenant_a_b_c");
        assert_eq!(database_name_for("Ünï"), "tenant__n_");
    }

    #[test]
    fn build_uses_override_or_identifier() {
        let derived = template().build("acme", None).unwrap();
        assert_eq!(derived.database(), "tenant_acme");
        assert_eq!(derived.url(), "postgres://u:p@db:5432/tenant_acme");

        let explicit = template().build("acme", Some("custom_db")).unwrap();
        assert_eq!(explicit.database(), "custom_db");

        assert!(matches!(
            template().build("acme", Some("Drop Table")),
            Err(ProvisioningError::InvalidLocator(_))
        ));
        assert!(template().build("acme", Some("")).is_err());
    }

    #[test]
    fn template_requires_single_placeholder() {
        assert!(LocatorTemplate::new("postgres://db/tessera").is_err());
        assert!(LocatorTemplate::new("postgres://db/{database}_{database}").is_err());
    }

    #[test]
    fn from_url_reads_last_segment() {
        let loc = DatastoreLocator::from_url("postgres://u:p@db:5432/tenant_acme?sslmode=disable").unwrap();
        assert_eq!(loc.database(), "tenant_acme");
        assert!(DatastoreLocator::from_url("postgres://u:p@db:5432/").is_err());
        assert!(DatastoreLocator::from_url("postgres://u:p@db:5432").is_err());
    }

    proptest! {
        #[test]
        fn any_identifier_yields_a_valid_database_name(identifier in ".{0,120}") {
            let name = database_name_for(&identifier);
            prop_assert!(name.starts_with(DATABASE_PREFIX));
            prop_assert!(validate_database_name(&name).is_ok());

            let loc = template().build(&identifier, None).unwrap();
            prop_assert_eq!(DatastoreLocator::from_url(loc.url()).unwrap(), loc);
        }
    }
}
