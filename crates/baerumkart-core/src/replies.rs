//! Canned replies: small talk, fallbacks for the insufficient-data sentinel,
//! and intent-specific follow-up lines appended to grounded answers.

use std::sync::LazyLock;

use baerumkart_schema::{ConversationState, Intent};
use regex::Regex;

pub const APOLOGY_REPLY: &str =
    "Beklager, jeg klarte ikke å få svar fra serveren etter flere forsøk. Prøv igjen senere!";

pub const BUSY_REPLY: &str =
    "Det er mange som spør akkurat nå. Prøv igjen om litt, så skal jeg hjelpe deg!";

/// Pending placeholder shown while a throttled request waits for its retry.
pub const THROTTLED_PLACEHOLDER: &str = "Mange spørsmål akkurat nå, jeg svarer om et øyeblikk...";

static FROM_PLACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bfra (\w+)").expect("valid from-place pattern"));

/// Reply to an out-of-scope message when no spot is being discussed.
pub fn small_talk(message: &str, prior_count: usize) -> &'static str {
    let lower = message.to_lowercase();
    if lower.contains("hei") || (lower.contains("hello") && prior_count <= 1) {
        return "Hei! Hva har du lyst til å snakke om i dag – kanskje en tur i Bærum?";
    }
    if lower.contains("hva skjer") {
        return "Ikke så mye, bare her og hjelper deg! Hva har du i tankene nå?";
    }
    if lower.contains("sakte") {
        return "Ok, du tar det med ro – det liker jeg! Hva vil du vite mer om nå?";
    }
    "Jeg finner ut av dette for deg, ett øyeblikk... Hva mente du med det?"
}

/// Starting point named as "fra <place>", in the user's own spelling.
fn from_place(message: &str) -> Option<&str> {
    FROM_PLACE
        .captures(message)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Stand-in answer when generation came back with the insufficient-data
/// sentinel.
pub fn fallback_reply(state: &ConversationState, message: &str) -> String {
    let Some(topic) = state.current_topic.as_deref() else {
        return "Jeg mangler akkurat den infoen i databasen. Kan du gi meg litt mer å gå på?".to_string();
    };

    match state.last_intent {
        Intent::Duration => match from_place(message) {
            Some(from) => format!(
                "Jeg har ikke nøyaktige tider fra {from} til {topic}, men det er en lett tur, så jeg vil anslå 1-2 timer tur-retur. Hvor fort pleier du å gå?"
            ),
            None => format!(
                "For {topic} vil jeg anslå 1-2 timer tur-retur, siden det er en lett tur. Hvor starter du fra, så kan jeg finjustere litt?"
            ),
        },
        Intent::Info => format!(
            "Jeg har ikke flere detaljer om {topic} akkurat nå, men det ligger i Bærumsmarka, et flott område med mange stier og natur. Hva vil du vite mer om – stier, utsikt, eller noe annet?"
        ),
        Intent::Parking => format!(
            "Jeg har ikke spesifikk info om parkering ved {topic}, men det er ofte parkering i nærheten av populære tursteder i Bærum, som ved Fossum eller nærliggende veier. Sjekk lokale kart for nøyaktig plass! Hva planlegger du å gjøre der?"
        ),
        _ => format!(
            "Jeg har ikke flere detaljer om {topic} akkurat nå, men jeg kan fortelle deg mer om området hvis du vil. Hva er du nysgjerrig på?"
        ),
    }
}

/// Append the follow-up line for the current intent to a grounded answer.
pub fn enhance(state: &ConversationState, answer: &str, message: &str) -> String {
    let follow_up = match state.last_intent {
        Intent::Recommend => "Håper det passer planene dine! Vil du vite mer om hvordan du kommer dit?",
        Intent::Info => "Der har du litt mer! Hva lurer du på nå?",
        Intent::Equipment => "Nå er du klar! Har du noe spesifikt utstyr i tankene allerede?",
        Intent::Duration if message.to_lowercase().contains("sakte") => {
            "Siden du går sakte, kan du kanskje legge til en halvtime ekstra. Hva pleier du å ta med for å gjøre turen komfortabel?"
        }
        Intent::Duration => "Det burde gi deg en idé! Skal du ta det rolig eller gå litt raskere?",
        Intent::Parking => "Der har du parkeringstips! Trenger du hjelp med noe annet til turen?",
        Intent::General | Intent::None => "Hva synes du? Skal vi snakke mer om dette?",
    };
    format!("{answer}\n\n{follow_up}")
}
