//! Reply phrase catalog with deterministic fallback to the default language.

use once_cell::sync::Lazy;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhraseKey {
    VacationAskStart,
    VacationAskEnd,
    VacationConfirm,
    VacationSaved,
    VacationOverlap,
    VacationCancelled,
    VacationInvalidStart,
    VacationInvalidEnd,
    VacationEndBeforeStart,
    VacationInvalidConfirm,
    VacationDenied,
    BookingConfirmed,
    BookingConflict,
    BookingUnavailable,
    Fallback,
    InsufficientContext,
    AiDisabled,
    Apology,
}

type Catalog = HashMap<PhraseKey, &'static [(&'static str, &'static str)]>;

static CATALOG: Lazy<Catalog> = Lazy::new(|| {
    use PhraseKey::*;
    let entries: [(PhraseKey, &'static [(&'static str, &'static str)]); 18] = [
        (VacationAskStart, &[
            ("en", "When does your vacation start? (e.g. 24/12/2024)"),
            ("fr", "Quelle est la date de début de vos congés ? (ex. 24/12/2024)"),
            ("ru", "С какой даты начинается отпуск? (например 24/12/2024)"),
        ]),
        (VacationAskEnd, &[
            ("en", "Great. And when does it end?"),
            ("fr", "Parfait. Et quand se termine-t-il ?"),
            ("ru", "Отлично. А когда он заканчивается?"),
        ]),
        (VacationConfirm, &[
            ("en", "Please confirm: from {start} to {end} (✅ to save, ❌ to cancel)."),
            ("fr", "Merci de confirmer : du {start} au {end} (✅ pour enregistrer, ❌ pour annuler)."),
            ("ru", "Подтвердите: с {start} по {end} (✅ чтобы сохранить, ❌ чтобы отменить)."),
        ]),
        (VacationSaved, &[
            ("en", "Saved! Enjoy your time off."),
            ("fr", "Enregistré ! Profitez de vos congés."),
            ("ru", "Сохранено! Приятного отдыха."),
        ]),
        (VacationOverlap, &[
            ("en", "Note: this overlaps {count} existing period(s)."),
            ("fr", "Attention : cette période chevauche {count} période(s) existante(s)."),
            ("ru", "Внимание: пересекается с {count} существующими периодами."),
        ]),
        (VacationCancelled, &[
            ("en", "Cancelled. No vacation saved."),
            ("fr", "Annulé. Aucun congé enregistré."),
            ("ru", "Отменено. Отпуск не сохранён."),
        ]),
        (VacationInvalidStart, &[
            ("en", "I couldn't read that start date. Please send it as DD/MM/YYYY."),
            ("fr", "Je n'ai pas compris cette date de début. Envoyez-la au format JJ/MM/AAAA."),
            ("ru", "Не удалось распознать дату начала. Отправьте её в формате ДД/ММ/ГГГГ."),
        ]),
        (VacationInvalidEnd, &[
            ("en", "I couldn't read that end date. Please send it as DD/MM/YYYY."),
            ("fr", "Je n'ai pas compris cette date de fin. Envoyez-la au format JJ/MM/AAAA."),
            ("ru", "Не удалось распознать дату окончания. Отправьте её в формате ДД/ММ/ГГГГ."),
        ]),
        (VacationEndBeforeStart, &[
            ("en", "The end date must be on or after {start}. When does it end?"),
            ("fr", "La date de fin doit être le {start} ou après. Quand se termine-t-il ?"),
            ("ru", "Дата окончания должна быть не раньше {start}. Когда он заканчивается?"),
        ]),
        (VacationInvalidConfirm, &[
            ("en", "Please answer ✅ to save or ❌ to cancel."),
            ("fr", "Répondez ✅ pour enregistrer ou ❌ pour annuler."),
            ("ru", "Ответьте ✅ чтобы сохранить или ❌ чтобы отменить."),
        ]),
        (VacationDenied, &[
            ("en", "⛔ Only owners can set vacation."),
            ("fr", "⛔ Seuls les propriétaires peuvent définir des congés."),
            ("ru", "⛔ Только владельцы могут задавать отпуск."),
        ]),
        (BookingConfirmed, &[
            ("en", "✅ Booked for {dt}. You'll get a reminder."),
            ("fr", "✅ Réservé pour {dt}. Vous recevrez un rappel."),
            ("ru", "✅ Забронировано на {dt}. Мы напомним заранее."),
        ]),
        (BookingConflict, &[
            ("en", "Sorry, {dt} is already taken. Please pick another time."),
            ("fr", "Désolé, {dt} est déjà réservé. Merci de choisir un autre créneau."),
            ("ru", "Извините, {dt} уже занято. Выберите другое время."),
        ]),
        (BookingUnavailable, &[
            ("en", "Sorry, we are closed on {dt}. Please pick another day."),
            ("fr", "Désolé, nous sommes fermés le {dt}. Merci de choisir un autre jour."),
            ("ru", "Извините, {dt} мы не работаем. Выберите другой день."),
        ]),
        (Fallback, &[
            ("en", "I’m unable to answer right now. A teammate will get back to you shortly."),
            ("fr", "Je ne peux pas répondre pour le moment. Un membre de l’équipe vous contactera bientôt."),
            ("ru", "Сейчас я не могу ответить. Сотрудник скоро свяжется с вами."),
        ]),
        (InsufficientContext, &[
            ("en", "I don’t have enough information in the FAQ to answer that. Would you like a teammate to follow up?"),
            ("fr", "Je ne dispose pas d’informations suffisantes dans la base FAQ. Souhaitez-vous qu’un membre de l’équipe prenne le relais ?"),
            ("ru", "В базе FAQ недостаточно информации для ответа. Передать вопрос сотруднику?"),
        ]),
        (AiDisabled, &[
            ("en", "Automatic answers are turned off. A teammate will reply soon."),
            ("fr", "Les réponses automatiques sont désactivées. Un membre de l’équipe vous répondra bientôt."),
            ("ru", "Автоматические ответы отключены. Сотрудник скоро ответит."),
        ]),
        (Apology, &[
            ("en", "Sorry, something went wrong on our side. Please try again in a moment."),
            ("fr", "Désolé, un problème est survenu de notre côté. Merci de réessayer dans un instant."),
            ("ru", "Извините, произошла ошибка. Попробуйте ещё раз чуть позже."),
        ]),
    ];
    entries.into_iter().collect()
});

/// Two-letter lowercase code from `fr`, `FR`, `fr-FR`, `fr_CA`.
pub fn normalize_lang(code: &str) -> Option<String> {
    let short: String = code
        .trim()
        .split(|c: char| c == '-' || c == '_')
        .next()
        .unwrap_or_default()
        .to_lowercase();
    if short.len() >= 2 && short.chars().all(|c| c.is_ascii_alphabetic()) {
        Some(short)
    } else {
        None
    }
}

/// Script heuristic: Cyrillic is Russian, Latin-1 accents are French.
pub fn detect_language(text: &str) -> Option<&'static str> {
    if text.chars().any(|c| matches!(c, '\u{0400}'..='\u{04FF}')) {
        return Some("ru");
    }
    if text
        .chars()
        .any(|c| matches!(c, 'à' | 'â' | 'ç' | 'é' | 'è' | 'ê' | 'ë' | 'î' | 'ï' | 'ô' | 'ù' | 'û' | 'ü' | 'œ'))
    {
        return Some("fr");
    }
    None
}

#[derive(Debug, Clone)]
pub struct Translator {
    default_language: String,
}

impl Translator {
    pub fn new(default_language: &str) -> Self {
        Self {
            default_language: normalize_lang(default_language).unwrap_or_else(|| "en".to_string()),
        }
    }

    pub fn default_language(&self) -> &str {
        &self.default_language
    }

    fn template(&self, key: PhraseKey, lang: &str) -> &'static str {
        let Some(variants) = CATALOG.get(&key) else {
            return "";
        };
        let lookup = |code: &str| variants.iter().find(|(l, _)| *l == code).map(|(_, t)| *t);

        normalize_lang(lang)
            .and_then(|code| lookup(&code))
            .or_else(|| lookup(&self.default_language))
            .or_else(|| lookup("en"))
            .unwrap_or("")
    }

    /// Render `key` in `lang`, substituting `{name}` placeholders.
    pub fn render(&self, key: PhraseKey, lang: &str, args: &[(&str, &str)]) -> String {
        let mut text = self.template(key, lang).to_string();
        for (name, value) in args {
            text = text.replace(&format!("{{{}}}", name), value);
        }
        text
    }

    pub fn text(&self, key: PhraseKey, lang: &str) -> String {
        self.render(key, lang, &[])
    }
}
