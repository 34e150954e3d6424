#[derive(Clone)]
pub enum Env {
    Dev,
    Staging,
    Production,
}

pub struct ServerConfig {
    pub env: Env,

    /// Reader-facing site URL in full form without trailing slash,
    /// e.g. https://newsbrief.app. Briefing story links resolve against it.
    pub site_url: String,

    pub database_url: String,
    pub redis_url: String,
    pub port: u16,

    // LLM provider credentials. Any of these may be absent; an absent key
    // leaves that provider unconfigured and the orchestrator falls back to
    // the default briefing model.
    pub anthropic_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub google_api_key: Option<String>,
    pub xai_api_key: Option<String>,

    /// Semantic (tier C) clustering is active only when a search service is
    /// configured.
    pub semantic_search: Option<SemanticSearch>,
}

pub struct SemanticSearch {
    pub url: String,
    pub index: String,
}

fn var(key: &str) -> Result<Option<String>, String> {
    match std::env::var(key) {
        Ok(env) => Ok(Some(env)),
        Err(e) => {
            tracing::warn!("Mising environment variable `{key}`");
            match e {
                std::env::VarError::NotPresent => Ok(None),
                std::env::VarError::NotUnicode(_) => Err(format!(
                    "Could not get the environment variable `{key}` due to unicode error"
                )),
            }
        }
    }
}

fn required_var(key: &str) -> String {
    let val = var(key);
    match val {
        Ok(val) => match val {
            Some(val) => val,
            None => {
                tracing::error!("Environment variable `{key}` is required");
                std::process::exit(1)
            }
        },
        Err(e) => {
            tracing::error!(
                "Environment variable `{key}` is required, but could not retrieve: {e}"
            );
            std::process::exit(1)
        }
    }
}

/// Either all or none variables are set, otherwise panics
fn all_or_none_vars(keys: Vec<&str>) -> Option<Vec<String>> {
    keys.iter().fold(None, |accum, k| match var(k) {
        Ok(Some(val)) => match accum {
            Some(mut l) => {
                l.push(val);
                Some(l)
            }
            None => Some(vec![val]),
        },
        _ => match accum {
            Some(_) => {
                let mut rest = keys.clone();
                rest.retain(|_k| _k != k);
                tracing::error!(
                    "Environment variable `{k}` is required if variables {rest:?} are present"
                );
                std::process::exit(1);
            }
            None => None,
        },
    })
}

impl ServerConfig {
    pub fn new_from_env() -> Self {
        let env = match var("ENVIRONMENT") {
            Ok(Some(env)) => match env.as_str() {
                "dev" => Env::Dev,
                "staging" => Env::Staging,
                "production" => Env::Production,
                _ => Env::Dev,
            },
            _ => Env::Dev,
        };

        let site_url = var("SITE_URL")
            .unwrap_or(Some("http://localhost:4321".to_string()))
            .unwrap_or("http://localhost:4321".to_string());
        let site_url = match url::Url::parse(&site_url) {
            Ok(parsed) => parsed.to_string().trim_end_matches('/').to_string(),
            Err(e) => {
                tracing::error!("Invalid SITE_URL `{site_url}`: {e}");
                std::process::exit(1)
            }
        };

        let redis_url = var("REDIS_URL")
            .unwrap_or(Some("redis://127.0.0.1:6379".to_string()))
            .unwrap_or("redis://127.0.0.1:6379".to_string());

        let port = var("PORT")
            .ok()
            .flatten()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        let semantic_search =
            all_or_none_vars(vec!["SEMANTIC_SEARCH_URL", "SEMANTIC_SEARCH_INDEX"]).map(
                |mut vars| SemanticSearch {
                    url: vars.remove(0),
                    index: vars.remove(0),
                },
            );

        ServerConfig {
            env,
            site_url,
            database_url: required_var("DATABASE_URL"),
            redis_url,
            port,
            anthropic_api_key: var("ANTHROPIC_API_KEY").ok().flatten(),
            openai_api_key: var("OPENAI_API_KEY").ok().flatten(),
            google_api_key: var("GOOGLE_API_KEY").ok().flatten(),
            xai_api_key: var("XAI_API_KEY").ok().flatten(),
            semantic_search,
        }
    }
}
