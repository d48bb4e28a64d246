use std::time::Duration;

/// ASP.NET control-name prefix shared by every control of the index form.
pub const FORM_ID: &str = "ctl00$ctl43$g_90441d47_53a9_460e_a62f_b50c50d57276$ctl00$";

#[derive(Debug, Clone)]
pub struct SiteConfig {
    pub index_url: String,
    /// Prefix of a meeting detail URL; the attendance BID is appended.
    pub attendance_url: String,
    pub digest_url: String,
    pub user_agent: String,
    pub error_marker: String,
    pub form_id: String,
    pub search_input_id: String,
}

impl SiteConfig {
    pub fn legislature_field(&self) -> String {
        format!("{}ddlLegislatura", self.form_id)
    }

    pub fn search_button(&self) -> String {
        format!("{}btnPesquisar", self.form_id)
    }

    pub fn results_grid(&self) -> String {
        format!("{}gvResults", self.form_id)
    }

    pub fn update_panel(&self) -> String {
        format!("{}pnlUpdate", self.form_id)
    }

    pub fn attendance_url_for(&self, attendance_bid: i64) -> String {
        format!("{}{}", self.attendance_url, attendance_bid)
    }
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            index_url: format!("{}/DeputadoGP/Paginas/reunioesplenarias.aspx", crate::BASE_URL),
            attendance_url: format!(
                "{}/DeputadoGP/Paginas/DetalheReuniaoPlenaria.aspx?BID=",
                crate::BASE_URL
            ),
            digest_url: format!("{}/DeputadoGP/_vti_bin/sites.asmx", crate::BASE_URL),
            user_agent: format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
            error_marker: "Ocorreu um erro inesperado.".to_string(),
            form_id: FORM_ID.to_string(),
            search_input_id: "pesquisa".to_string(),
        }
    }
}

/// Bounded retry budget for timeouts and unclassified HTTP failures.
///
/// `max_retries` counts attempts *after* the first one, so the default of 2
/// allows three attempts in total. Pauses caused by a busy server (503) never
/// consume this budget.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
    pub busy_pause: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff: Duration::from_secs(5 * 60),
            busy_pause: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScraperConfig {
    pub site: SiteConfig,
    pub retry: RetryPolicy,
    pub timeout: Duration,
    pub verbose: bool,
}

impl ScraperConfig {
    /// Level used for progress messages: `info` when verbose, `debug` otherwise.
    pub fn progress_level(&self) -> log::Level {
        if self.verbose {
            log::Level::Info
        } else {
            log::Level::Debug
        }
    }
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            site: SiteConfig::default(),
            retry: RetryPolicy::default(),
            timeout: Duration::from_secs(60),
            verbose: false,
        }
    }
}
