//! Per-tenant practice profiles.
//!
//! Profiles are read from `practice_profiles` and cached per tenant. A
//! missing or unreadable profile never fails a call: the generic profile is
//! used instead and the problem is logged as a configuration error.

use std::sync::Arc;

use calmline_db::DbPool;
use calmline_types::voice::VoiceProfile;
use dashmap::DashMap;
use rusqlite::{params, Connection, OptionalExtension};

use crate::accessibility::AccessibilityNeeds;
use crate::error::DialogueError;

#[derive(Debug, Clone, PartialEq)]
pub struct PracticeProfile {
    pub tenant_id: String,
    pub practice_name: String,
    pub phone: Option<String>,
    pub hours: Option<String>,
    /// States where the practice is licensed for telehealth.
    pub telehealth_states: Vec<String>,
    pub welcome_message: Option<String>,
    pub voice: Option<VoiceProfile>,
}

impl PracticeProfile {
    pub fn generic(tenant_id: &str) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            practice_name: "our counseling practice".to_string(),
            phone: None,
            hours: Some("Monday through Friday, 9 AM to 5 PM".to_string()),
            telehealth_states: Vec::new(),
            welcome_message: None,
            voice: None,
        }
    }

    /// Loads the profile for `tenant_id`, or `None` if there is no row.
    pub fn load(conn: &Connection, tenant_id: &str) -> Result<Option<Self>, DialogueError> {
        let row = conn
            .query_row(
                "SELECT practice_name, phone, hours, telehealth_states, welcome_message,
                        voice_profile_json
                 FROM practice_profiles WHERE tenant_id = ?1",
                params![tenant_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, Option<String>>(5)?,
                    ))
                },
            )
            .optional()?;

        let Some((practice_name, phone, hours, states, welcome_message, voice_json)) = row else {
            return Ok(None);
        };

        let voice = match voice_json.filter(|json| !json.trim().is_empty()) {
            Some(json) => Some(serde_json::from_str::<VoiceProfile>(&json).map_err(|e| {
                DialogueError::Configuration(format!(
                    "invalid voice profile for tenant {}: {}",
                    tenant_id, e
                ))
            })?),
            None => None,
        };

        Ok(Some(Self {
            tenant_id: tenant_id.to_string(),
            practice_name,
            phone,
            hours,
            telehealth_states: states
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
            welcome_message,
            voice,
        }))
    }

    /// Greeting spoken once when a call connects.
    pub fn welcome(&self) -> String {
        self.welcome_message.clone().unwrap_or_else(|| {
            format!(
                "Thank you for calling {}. How can I help you today?",
                self.practice_name
            )
        })
    }

    fn states_phrase(&self) -> String {
        match self.telehealth_states.as_slice() {
            [] => "the states where our clinicians are licensed".to_string(),
            [one] => one.clone(),
            [rest @ .., last] => format!("{} and {}", rest.join(", "), last),
        }
    }

    /// Eligibility disclaimer read at the start of intake.
    pub fn disclaimer(&self) -> String {
        format!(
            "I'd be happy to help you get started. Before we begin, I want to let you know \
             that {} offers therapy by secure video for residents of {}. We see adults and \
             children ages 10 and up, and we're not able to accept Medicaid or Medicare. \
             Does that work for you?",
            self.practice_name,
            self.states_phrase()
        )
    }

    /// Base system prompt for generated answers.
    pub fn system_prompt(&self, needs: &AccessibilityNeeds) -> String {
        let mut prompt = format!(
            "You are the friendly receptionist for {}, a counseling practice. \
             Answer in one to three short spoken sentences. Never give medical, \
             diagnostic or medication advice. If you are unsure, say you don't know \
             and offer to take a message.\n",
            self.practice_name
        );
        if let Some(hours) = &self.hours {
            prompt.push_str(&format!("Office hours: {}.\n", hours));
        }
        if let Some(phone) = &self.phone {
            prompt.push_str(&format!("Office phone: {}.\n", phone));
        }
        prompt.push_str(&format!(
            "Sessions are telehealth only, for residents of {}.\n",
            self.states_phrase()
        ));
        for directive in needs.prompt_directives() {
            prompt.push_str(directive);
            prompt.push('\n');
        }
        prompt
    }
}

/// Cached lookup of practice profiles by tenant.
#[derive(Clone)]
pub struct PracticeDirectory {
    pool: DbPool,
    cache: Arc<DashMap<String, Arc<PracticeProfile>>>,
}

impl PracticeDirectory {
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            cache: Arc::new(DashMap::new()),
        }
    }

    /// Returns the tenant's profile, falling back to the generic one.
    ///
    /// Database failures are not cached so a later call can retry.
    pub async fn get(&self, tenant_id: &str) -> Arc<PracticeProfile> {
        if let Some(profile) = self.cache.get(tenant_id) {
            return Arc::clone(profile.value());
        }

        let pool = self.pool.clone();
        let tenant = tenant_id.to_string();
        let loaded = tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            PracticeProfile::load(&conn, &tenant)
        })
        .await
        .map_err(DialogueError::from)
        .and_then(|result| result);

        match loaded {
            Ok(Some(profile)) => {
                let profile = Arc::new(profile);
                self.cache
                    .entry(tenant_id.to_string())
                    .or_insert_with(|| Arc::clone(&profile))
                    .clone()
            }
            Ok(None) => {
                tracing::warn!(
                    tenant_id,
                    "no practice profile configured, using generic profile"
                );
                let generic = Arc::new(PracticeProfile::generic(tenant_id));
                self.cache
                    .entry(tenant_id.to_string())
                    .or_insert(generic)
                    .clone()
            }
            Err(e) => {
                tracing::error!(tenant_id, error = %e, "failed to load practice profile");
                Arc::new(PracticeProfile::generic(tenant_id))
            }
        }
    }

    /// Drops a cached profile so the next lookup reloads it.
    pub fn invalidate(&self, tenant_id: &str) {
        self.cache.remove(tenant_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use calmline_db::{create_memory_pool, run_migrations};

    fn pool() -> DbPool {
        let pool = create_memory_pool().expect("pool");
        run_migrations(&pool.get().expect("conn")).expect("migrations");
        pool
    }

    #[test]
    fn disclaimer_lists_states_and_asks_for_agreement() {
        let profile = PracticeProfile {
            telehealth_states: vec!["New Jersey".into(), "New York".into(), "Pennsylvania".into()],
            ..PracticeProfile::generic("t1")
        };
        let text = profile.disclaimer();
        assert!(text.contains("New Jersey, New York and Pennsylvania"));
        assert!(text.contains("Medicaid or Medicare"));
        assert!(text.ends_with("Does that work for you?"));
    }

    #[test]
    fn load_parses_states_and_voice() {
        let pool = pool();
        let conn = pool.get().expect("conn");
        conn.execute(
            "INSERT INTO practice_profiles
                (tenant_id, practice_name, phone, hours, telehealth_states, voice_profile_json)
             VALUES ('t1', 'Harbor Counseling', '555-0100', '9 to 5', 'New Jersey, New York',
                     '{\"id\":\"warm\",\"voice_id\":\"abc\"}')",
            [],
        )
        .expect("insert");

        let profile = PracticeProfile::load(&conn, "t1")
            .expect("load")
            .expect("profile present");
        assert_eq!(profile.practice_name, "Harbor Counseling");
        assert_eq!(profile.telehealth_states, vec!["New Jersey", "New York"]);
        assert_eq!(profile.voice.expect("voice").id, "warm");
        assert!(PracticeProfile::load(&conn, "missing").expect("load").is_none());
    }

    #[test]
    fn invalid_voice_json_is_a_configuration_error() {
        let pool = pool();
        let conn = pool.get().expect("conn");
        conn.execute(
            "INSERT INTO practice_profiles (tenant_id, practice_name, voice_profile_json)
             VALUES ('t2', 'Broken', 'not json')",
            [],
        )
        .expect("insert");
        assert!(matches!(
            PracticeProfile::load(&conn, "t2"),
            Err(DialogueError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn directory_falls_back_to_generic() {
        let directory = PracticeDirectory::new(pool());
        let profile = directory.get("unknown").await;
        assert_eq!(profile, Arc::new(PracticeProfile::generic("unknown")));
        assert!(profile.welcome().starts_with("Thank you for calling"));
    }

    #[test]
    fn system_prompt_carries_accessibility_directives() {
        let needs = AccessibilityNeeds {
            simple_language: true,
            ..AccessibilityNeeds::default()
        };
        let prompt = PracticeProfile::generic("t").system_prompt(&needs);
        assert!(prompt.contains("Office hours"));
        assert!(prompt.contains("simple, everyday words"));
    }
}
