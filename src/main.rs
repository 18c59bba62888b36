use dotenvy::dotenv;
use permiso_bot::bot;
use permiso_bot::config::Settings;
use regex::Regex;
use std::io::{self, Write};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{prelude::*, EnvFilter};

/// Secrets masked in every log line, with their replacement
struct RedactionPatterns {
    rules: Vec<(Regex, &'static str)>,
}

impl RedactionPatterns {
    /// Compile the masking rules
    ///
    /// # Errors
    ///
    /// Returns an error if any regex pattern is invalid
    fn new() -> Result<Self, regex::Error> {
        let rules = vec![
            // token inside Bot API URLs
            (
                Regex::new(r"(https?://[^/]+/bot)([0-9]+:[A-Za-z0-9_-]+)(/['\s]*)")?,
                "$1[TELEGRAM_TOKEN]$3",
            ),
            (
                Regex::new(r"([0-9]{8,10}:[A-Za-z0-9_-]{35})")?,
                "[TELEGRAM_TOKEN]",
            ),
            (Regex::new(r"\bxai-[A-Za-z0-9]{16,}")?, "[XAI_API_KEY]"),
            (Regex::new(r"\bgsk_[A-Za-z0-9]{16,}")?, "[GROQ_API_KEY]"),
            (Regex::new(r"\bsk-[A-Za-z0-9_-]{16,}")?, "[OPENAI_API_KEY]"),
            (Regex::new(r"(Bearer )[A-Za-z0-9._-]+")?, "$1[MASKED]"),
        ];
        Ok(Self { rules })
    }

    fn redact(&self, input: &str) -> String {
        self.rules
            .iter()
            .fold(input.to_string(), |output, (pattern, replacement)| {
                pattern.replace_all(&output, *replacement).into_owned()
            })
    }
}

struct RedactingWriter<W: Write> {
    inner: W,
    patterns: Arc<RedactionPatterns>,
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let redacted = self.patterns.redact(&String::from_utf8_lossy(buf));
        self.inner.write_all(redacted.as_bytes())?;
        // the caller's buffer was consumed in full
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

struct RedactingMakeWriter<F> {
    make_inner: F,
    patterns: Arc<RedactionPatterns>,
}

impl<'a, F, W> tracing_subscriber::fmt::MakeWriter<'a> for RedactingMakeWriter<F>
where
    F: Fn() -> W + 'static,
    W: Write,
{
    type Writer = RedactingWriter<W>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter {
            inner: (self.make_inner)(),
            patterns: Arc::clone(&self.patterns),
        }
    }
}

fn init_logging(patterns: Arc<RedactionPatterns>) {
    let make_writer = RedactingMakeWriter {
        make_inner: io::stderr,
        patterns,
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,hyper=warn,reqwest=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(make_writer))
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    let patterns = Arc::new(RedactionPatterns::new().map_err(|e| {
        eprintln!("Failed to compile regex patterns: {e}");
        e
    })?);
    init_logging(patterns);

    info!("Starting Permiso B theory bot...");

    let settings = match Settings::new() {
        Ok(s) => {
            info!("Configuration loaded successfully.");
            Arc::new(s)
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = bot::run_bot(settings).await {
        error!("Bot terminated: {e:#}");
        std::process::exit(1);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redacts_telegram_token_in_url() {
        let patterns = RedactionPatterns::new().expect("patterns");
        let line = "GET https://api.telegram.org/bot123456789:AAHdqTcvCH1vGWJxfSeofSAs0K5PALDsaw0/getMe failed";
        let redacted = patterns.redact(line);
        assert!(redacted.contains("/bot[TELEGRAM_TOKEN]/getMe"));
        assert!(!redacted.contains("AAHdqTcvCH1vGWJxfSeofSAs0K5PALDsaw0"));
    }

    #[test]
    fn test_redacts_provider_keys() {
        let patterns = RedactionPatterns::new().expect("patterns");
        let redacted = patterns.redact(
            "keys xai-abcdefghijklmnopqrst gsk_abcdefghijklmnopqrst sk-proj-abcdefghijklmnop",
        );
        assert_eq!(
            redacted,
            "keys [XAI_API_KEY] [GROQ_API_KEY] [OPENAI_API_KEY]"
        );
    }

    #[test]
    fn test_redacts_bearer_header() {
        let patterns = RedactionPatterns::new().expect("patterns");
        assert_eq!(
            patterns.redact("authorization: Bearer abc.def-123"),
            "authorization: Bearer [MASKED]"
        );
    }

    #[test]
    fn test_plain_text_untouched() {
        let patterns = RedactionPatterns::new().expect("patterns");
        assert_eq!(
            patterns.redact("Parsing screenshot task-list"),
            "Parsing screenshot task-list"
        );
    }
}
