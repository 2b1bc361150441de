// SPDX-License-Identifier: GPL-3.0-only

//! Fluent bundle for every line shown to the user

use std::sync::LazyLock;

use i18n_embed::fluent::{FluentLanguageLoader, fluent_language_loader};
use i18n_embed::unic_langid::LanguageIdentifier;
use i18n_embed::{DefaultLocalizer, DesktopLanguageRequester, LanguageLoader, Localizer};
use rust_embed::RustEmbed;

#[derive(RustEmbed)]
#[folder = "i18n/"]
struct Localizations;

pub static LANGUAGE_LOADER: LazyLock<FluentLanguageLoader> = LazyLock::new(|| {
    let loader: FluentLanguageLoader = fluent_language_loader!();
    if let Err(e) = loader.load_fallback_language(&Localizations) {
        tracing::warn!("error while loading the fallback language: {e}");
    }
    // Report lines end up in logs and plain terminals.
    loader.set_use_isolating(false);
    loader
});

#[must_use]
pub fn localizer() -> Box<dyn Localizer> {
    Box::new(DefaultLocalizer::new(&*LANGUAGE_LOADER, &Localizations))
}

/// Select the bundle for the languages the desktop asks for.
pub fn init() {
    select(&DesktopLanguageRequester::requested_languages());
}

pub fn select(requested: &[LanguageIdentifier]) {
    if let Err(e) = localizer().select(requested) {
        tracing::warn!("error while loading fluent localizations: {e}");
    }
}

/// Look up a message of the bundle, with optional `name = value` arguments.
#[macro_export]
macro_rules! fl {
    ($message_id:literal) => {{
        i18n_embed_fl::fl!($crate::localize::LANGUAGE_LOADER, $message_id)
    }};

    ($message_id:literal, $($args:expr),*) => {{
        i18n_embed_fl::fl!($crate::localize::LANGUAGE_LOADER, $message_id, $($args), *)
    }};
}
