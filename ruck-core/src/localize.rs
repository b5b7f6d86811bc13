use fluent_bundle::{FluentArgs, FluentBundle, FluentResource, FluentValue};
use unic_langid::LanguageIdentifier;

/// Fluent-based localizer for the CLI's status and error lines. The core
/// library itself never formats text (see `manifest::StatusEvent`); only the
/// CLI layer reaches for this.
pub struct RuckLoc {
    bundle: FluentBundle<FluentResource>,
}

impl RuckLoc {
    /// Create a localizer using the built-in `.ftl` strings (see `../i18n`),
    /// selected from the `RUCK_LANG` environment variable convention.
    pub fn builtin(lang: &str) -> Self {
        let langid: LanguageIdentifier = lang.parse().unwrap_or_else(|_| "en-GB".parse().unwrap());

        let ftl_src = match lang {
            "en-GB" | "en" => include_str!("../i18n/en-GB.ftl"),
            _ => include_str!("../i18n/en-GB.ftl"),
        };

        let res = FluentResource::try_new(ftl_src.to_owned()).expect("invalid FTL resource (en-GB.ftl)");

        let mut bundle = FluentBundle::new(vec![langid]);
        bundle.add_resource(res).expect("failed to add FTL resource");
        Self { bundle }
    }

    /// Format a message by code with named args. Returns the code itself if
    /// the message or any referenced argument is missing.
    pub fn msg(&self, code: &str, args: &[(&str, &str)]) -> String {
        let Some(msg) = self.bundle.get_message(code) else {
            return code.to_string();
        };
        let Some(pattern) = msg.value() else {
            return code.to_string();
        };

        let mut fa = FluentArgs::new();
        for (k, v) in args {
            fa.set(*k, FluentValue::from(*v));
        }

        let mut errs = vec![];
        let s = self.bundle.format_pattern(pattern, Some(&fa), &mut errs).to_string();

        if errs.is_empty() {
            s
        } else {
            code.to_string()
        }
    }
}

/// A no-op localizer, used in tests that don't care about wording.
pub struct NoopLoc;

impl NoopLoc {
    pub fn msg(&self, code: &str, _args: &[(&str, &str)]) -> String {
        code.to_string()
    }
}
