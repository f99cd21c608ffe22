//! Auth command: the offline sign-in cache.
//!
//! There is no identity provider in the CLI; `login` records the user a
//! provider would have returned so offline access can be exercised.

use anyhow::{Result, bail};
use serde::Serialize;

use aquamon_core::{AccessDecision, OfflineAuthCache};
use aquamon_types::AuthUser;

use super::Context;
use crate::cli::{AuthAction, OutputFormat};
use crate::format::format_json;
use crate::style;
use crate::util::open_monitor;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AuthStatus {
    user: Option<AuthUser>,
    has_ever_logged_in: bool,
    offline_session_valid: bool,
    online: bool,
    decision: &'static str,
    auth_required: bool,
}

fn decision_label(decision: AccessDecision) -> &'static str {
    match decision {
        AccessDecision::Allow => "allow",
        AccessDecision::RequireLogin => "require-login",
        AccessDecision::DeferToProvider => "defer-to-provider",
    }
}

fn status(auth: &OfflineAuthCache, online: bool, provider_session: bool) -> Result<AuthStatus> {
    // Validation may wipe an expired session, so it runs first
    let offline_session_valid = auth.validate_offline_session()?;
    let decision = auth.access_decision(online)?;
    let state = auth.state()?;
    Ok(AuthStatus {
        user: state.cached_user,
        has_ever_logged_in: state.has_ever_logged_in,
        offline_session_valid,
        online,
        decision: decision_label(decision),
        auth_required: auth.is_auth_required(online, provider_session)?,
    })
}

fn format_status(status: &AuthStatus, no_color: bool) -> String {
    let mut out = match &status.user {
        Some(user) => format!("User:          {} <{}>\n", user.name, user.email),
        None => "User:          (none)\n".to_string(),
    };
    if let Some(user) = &status.user
        && (user.is_admin || !user.roles.is_empty())
    {
        let mut roles = user.roles.clone();
        if user.is_admin {
            roles.insert(0, "admin".into());
        }
        out.push_str(&format!("Roles:         {}\n", roles.join(", ")));
    }
    out.push_str(&format!(
        "Network:       {}\n",
        if status.online { "online" } else { "offline" }
    ));
    out.push_str(&format!(
        "Offline session: {}\n",
        if status.offline_session_valid { "valid" } else { "expired" }
    ));
    let access = if status.auth_required {
        style::format_warning("sign-in required", no_color)
    } else {
        style::format_success("allowed", no_color)
    };
    out.push_str(&format!("Access:        {}\n", access));
    out
}

pub fn cmd_auth(ctx: &Context, action: AuthAction) -> Result<()> {
    let monitor = open_monitor(&ctx.config)?;
    let auth = monitor.auth();
    match action {
        AuthAction::Login {
            id,
            name,
            email,
            admin,
            roles,
        } => {
            if id.trim().is_empty() || email.trim().is_empty() {
                bail!("id and email are required");
            }
            auth.set_cached_user(Some(AuthUser {
                id,
                name,
                email: email.clone(),
                is_admin: admin,
                roles,
            }))?;
            ctx.status(&style::format_success(
                &format!("Signed in as {} (valid offline for 24 hours)", email),
                ctx.opts.no_color,
            ));
            Ok(())
        }
        AuthAction::Logout => {
            auth.set_cached_user(None)?;
            ctx.status(&style::format_success("Signed out", ctx.opts.no_color));
            Ok(())
        }
        AuthAction::Status {
            offline,
            provider_session,
            output,
        } => {
            let status = status(auth, !offline, provider_session)?;
            let content = match ctx.format(&output) {
                OutputFormat::Json => format_json(&status)?,
                OutputFormat::Text => format_status(&status, ctx.opts.no_color),
            };
            ctx.emit(&content)
        }
    }
}
