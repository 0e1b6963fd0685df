//! Dashboard and submenu rendering.
//!
//! Pure functions from state to `(text, inline keyboard)` pairs; the
//! handler routes callback data back into state changes and re-renders.

use tether_store::{Project, Provider, Session};

use crate::state::ChatState;
use crate::transport::KeyboardButton;

/// Model choices offered per engine. The empty value means engine default.
#[must_use]
pub fn models_for(engine: Provider) -> &'static [&'static str] {
    match engine {
        Provider::Claude => &["claude-opus-4-6", "claude-sonnet-4-5", "claude-haiku-4-5"],
        Provider::Opencode => &["anthropic/claude-sonnet-4-5", "openai/gpt-5"],
    }
}

/// Render the main dashboard.
#[must_use]
pub fn render_dashboard(
    state: &ChatState,
    projects: &[Project],
) -> (String, Vec<Vec<KeyboardButton>>) {
    let project_name = state
        .project_id
        .as_deref()
        .and_then(|id| projects.iter().find(|p| p.id == id))
        .map_or("-", |p| p.name.as_str());

    let text = format!(
        "Tether dashboard\n\
         Project: {project_name}\n\
         Engine: {}\n\
         Model: {}\n\
         Session: {}",
        state.default_engine.as_sql(),
        state.model.as_deref().unwrap_or("default"),
        state.session_id.as_deref().unwrap_or("-"),
    );

    let mut keyboard: Vec<Vec<KeyboardButton>> = Vec::new();

    // Project buttons, up to three per row, checkmark on the current one.
    for chunk in projects.chunks(3) {
        keyboard.push(
            chunk
                .iter()
                .map(|p| {
                    let selected = state.project_id.as_deref() == Some(p.id.as_str());
                    let label = if selected {
                        format!("✓ {}", p.name)
                    } else {
                        p.name.clone()
                    };
                    KeyboardButton::new(label, format!("proj:{}", p.id))
                })
                .collect(),
        );
    }

    let other_engine = match state.default_engine {
        Provider::Claude => Provider::Opencode,
        Provider::Opencode => Provider::Claude,
    };
    keyboard.push(vec![
        KeyboardButton::new(
            format!("Engine: {} ⇄", state.default_engine.as_sql()),
            format!("engine:{}", other_engine.as_sql()),
        ),
        KeyboardButton::new("Models", "models"),
    ]);
    keyboard.push(vec![
        KeyboardButton::new("New session", "newsession"),
        KeyboardButton::new("Sessions", "sessions"),
        KeyboardButton::new("CLI sessions", "clisessions"),
    ]);
    keyboard.push(vec![
        KeyboardButton::new("Unsafe 30m", "unsafe:30"),
        KeyboardButton::new("Unsafe 60m", "unsafe:60"),
        KeyboardButton::new("Unsafe off", "unsafe_off"),
    ]);
    keyboard.push(vec![KeyboardButton::new("Refresh", "refresh")]);

    (text, keyboard)
}

/// Render the sessions submenu.
#[must_use]
pub fn render_sessions_menu(
    state: &ChatState,
    sessions: &[Session],
) -> (String, Vec<Vec<KeyboardButton>>) {
    let text = if sessions.is_empty() {
        "No sessions in this project yet.".to_string()
    } else {
        format!("Sessions ({}):", sessions.len())
    };

    let mut keyboard: Vec<Vec<KeyboardButton>> = sessions
        .iter()
        .map(|s| {
            let selected = state.session_id.as_deref() == Some(s.id.as_str());
            let marker = if selected { "✓ " } else { "" };
            let label = format!("{marker}{} ({})", short_id(&s.id), s.provider.as_sql());
            vec![KeyboardButton::new(label, format!("session:{}", s.id))]
        })
        .collect();
    keyboard.push(vec![
        KeyboardButton::new("Continue last", "continue"),
        KeyboardButton::new("Back", "back"),
    ]);

    (text, keyboard)
}

/// Render the models submenu for the current engine.
#[must_use]
pub fn render_models_menu(state: &ChatState) -> (String, Vec<Vec<KeyboardButton>>) {
    let text = format!(
        "Model for {} (current: {})",
        state.default_engine.as_sql(),
        state.model.as_deref().unwrap_or("default"),
    );

    let mut keyboard: Vec<Vec<KeyboardButton>> = vec![vec![KeyboardButton::new(
        "Engine default",
        "model:",
    )]];
    for model in models_for(state.default_engine) {
        let selected = state.model.as_deref() == Some(*model);
        let marker = if selected { "✓ " } else { "" };
        keyboard.push(vec![KeyboardButton::new(
            format!("{marker}{model}"),
            format!("model:{model}"),
        )]);
    }
    keyboard.push(vec![KeyboardButton::new("Back", "back")]);

    (text, keyboard)
}

/// Render the engine-side (CLI) sessions submenu: sessions that captured an
/// engine session id and can be peeked or re-attached.
#[must_use]
pub fn render_cli_sessions_menu(sessions: &[Session]) -> (String, Vec<Vec<KeyboardButton>>) {
    let with_ids: Vec<&Session> = sessions
        .iter()
        .filter(|s| {
            s.engine_session_id
                .as_deref()
                .is_some_and(|id| id != tether_store::CONTINUE_MARKER)
        })
        .collect();

    let text = if with_ids.is_empty() {
        "No engine-side sessions captured yet.".to_string()
    } else {
        format!("Engine-side sessions ({}):", with_ids.len())
    };

    let mut keyboard: Vec<Vec<KeyboardButton>> = with_ids
        .iter()
        .map(|s| {
            vec![KeyboardButton::new(
                format!("{} ({})", short_id(&s.id), s.provider.as_sql()),
                format!("clipeek:{}", s.id),
            )]
        })
        .collect();
    keyboard.push(vec![KeyboardButton::new("Back", "back")]);

    (text, keyboard)
}

/// Render one engine-side session's details with an attach button.
#[must_use]
pub fn render_cli_peek(session: &Session) -> (String, Vec<Vec<KeyboardButton>>) {
    let engine_id = session.engine_session_id.as_deref().unwrap_or("-");
    let text = format!(
        "Session {}\nEngine: {}\nEngine session id: {engine_id}\nPrompt: {}",
        session.id,
        session.provider.as_sql(),
        tether_core::text::truncate_str(&session.prompt, 120),
    );
    let keyboard = vec![
        vec![KeyboardButton::new(
            "Attach here",
            format!("cliattach:{engine_id}"),
        )],
        vec![KeyboardButton::new("Back", "clisessions")],
    ];
    (text, keyboard)
}

/// Short display form of a prefixed UUID id.
fn short_id(id: &str) -> &str {
    if id.len() > 13 {
        &id[..13]
    } else {
        id
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tether_store::SessionStatus;

    fn project(id: &str) -> Project {
        Project {
            id: id.into(),
            name: id.to_uppercase(),
            root_path: format!("/srv/{id}"),
            default_engine: Provider::Claude,
            opencode_attach_url: None,
        }
    }

    fn session(id: &str, engine_id: Option<&str>) -> Session {
        Session {
            id: id.into(),
            project_id: "web".into(),
            chat_id: None,
            provider: Provider::Claude,
            engine_session_id: engine_id.map(String::from),
            status: SessionStatus::Active,
            prompt: "prompt".into(),
            model: None,
            agent: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn dashboard_marks_current_project() {
        let mut state = ChatState::default();
        state.project_id = Some("web".into());
        let projects = vec![project("web"), project("api")];

        let (text, keyboard) = render_dashboard(&state, &projects);
        assert!(text.contains("Project: WEB"));
        assert_eq!(keyboard[0][0].text, "✓ WEB");
        assert_eq!(keyboard[0][1].text, "API");
        assert_eq!(keyboard[0][0].callback_data, "proj:web");
    }

    #[test]
    fn dashboard_chunks_projects_in_threes() {
        let state = ChatState::default();
        let projects: Vec<Project> =
            ["a", "b", "c", "d"].iter().map(|id| project(id)).collect();
        let (_, keyboard) = render_dashboard(&state, &projects);
        assert_eq!(keyboard[0].len(), 3);
        assert_eq!(keyboard[1].len(), 1);
    }

    #[test]
    fn dashboard_engine_toggle_targets_other_engine() {
        let state = ChatState::default();
        let (_, keyboard) = render_dashboard(&state, &[]);
        let toggle = keyboard
            .iter()
            .flatten()
            .find(|b| b.text.starts_with("Engine:"))
            .unwrap();
        assert_eq!(toggle.callback_data, "engine:opencode");
    }

    #[test]
    fn dashboard_has_unsafe_and_refresh_rows() {
        let state = ChatState::default();
        let (_, keyboard) = render_dashboard(&state, &[]);
        let all: Vec<&str> = keyboard
            .iter()
            .flatten()
            .map(|b| b.callback_data.as_str())
            .collect();
        for expected in ["unsafe:30", "unsafe:60", "unsafe_off", "refresh", "models"] {
            assert!(all.contains(&expected), "missing {expected}");
        }
    }

    #[test]
    fn sessions_menu_lists_and_marks() {
        let mut state = ChatState::default();
        state.session_id = Some("sess-b".into());
        let sessions = vec![session("sess-a", None), session("sess-b", None)];

        let (text, keyboard) = render_sessions_menu(&state, &sessions);
        assert!(text.contains("Sessions (2)"));
        assert!(keyboard[1][0].text.starts_with("✓ "));
        assert_eq!(keyboard[0][0].callback_data, "session:sess-a");
    }

    #[test]
    fn models_menu_offers_default_and_engine_models() {
        let state = ChatState::default();
        let (_, keyboard) = render_models_menu(&state);
        assert_eq!(keyboard[0][0].callback_data, "model:");
        assert!(keyboard
            .iter()
            .flatten()
            .any(|b| b.callback_data == "model:claude-opus-4-6"));
    }

    #[test]
    fn cli_sessions_skips_marker_and_empty() {
        let sessions = vec![
            session("sess-a", None),
            session("sess-b", Some(tether_store::CONTINUE_MARKER)),
            session("sess-c", Some("ses_real")),
        ];
        let (text, keyboard) = render_cli_sessions_menu(&sessions);
        assert!(text.contains("(1)"));
        // One session row plus the back row.
        assert_eq!(keyboard.len(), 2);
        assert_eq!(keyboard[0][0].callback_data, "clipeek:sess-c");
    }

    #[test]
    fn cli_peek_offers_attach() {
        let s = session("sess-c", Some("ses_real"));
        let (text, keyboard) = render_cli_peek(&s);
        assert!(text.contains("ses_real"));
        assert_eq!(keyboard[0][0].callback_data, "cliattach:ses_real");
    }
}
