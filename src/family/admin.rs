//! Administrative login users.

use super::{diagnose, wrong_family, BuildOutput, FamilyContext, RecordFamily};
use crate::error::{Error, Result};
use crate::matcher::MatchResult;
use crate::normalize::{Normalizer, ADMINISTRATOR};
use crate::record::{DerivableField, DomainRecord};
use crate::synth::{values, Command};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Settings from `user attribute <name> ...`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub administrator: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub connection: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gui_pages: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login_timer: Option<u32>,
    /// Attributes without a dedicated field, kept verbatim
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl UserAttributes {
    fn parse(raw: &str, normalizer: &Normalizer) -> Result<Self> {
        let mut attrs = UserAttributes::default();
        for token in raw.split_whitespace() {
            let (key, value) = token.split_once('=').ok_or_else(|| {
                Error::validation("attributes", "user attribute", format!("'{}' is not key=value", token))
            })?;
            let list = || value.split(',').map(str::to_string).collect::<Vec<_>>();
            match key {
                "administrator" => attrs.administrator = Some(normalizer.to_bool(ADMINISTRATOR, value)?),
                "connection" => attrs.connection = list(),
                "gui-page" => attrs.gui_pages = list(),
                "login-timer" => {
                    attrs.login_timer = Some(value.parse().map_err(|_| {
                        Error::validation("login-timer", "user attribute", format!("'{}' is not a number", value))
                    })?)
                }
                other => {
                    attrs.extra.insert(other.to_string(), value.to_string());
                }
            }
        }
        Ok(attrs)
    }

    fn render(&self, normalizer: &Normalizer) -> Result<String> {
        let mut parts = Vec::new();
        if let Some(admin) = self.administrator {
            parts.push(format!("administrator={}", normalizer.bool_spelling(ADMINISTRATOR, admin)?));
        }
        if !self.connection.is_empty() {
            parts.push(format!("connection={}", self.connection.join(",")));
        }
        if !self.gui_pages.is_empty() {
            parts.push(format!("gui-page={}", self.gui_pages.join(",")));
        }
        if let Some(timer) = self.login_timer {
            parts.push(format!("login-timer={}", timer));
        }
        for (key, value) in &self.extra {
            parts.push(format!("{}={}", key, value));
        }
        Ok(parts.join(" "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminUser {
    pub username: String,
    /// Plaintext password. The device only shows it back encrypted.
    #[serde(default)]
    pub password: DerivableField<String>,
    /// Hash as shown by the device
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<UserAttributes>,
}

impl AdminUser {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: DerivableField::Absent,
            encrypted_password: None,
            attributes: None,
        }
    }

    fn has_login(&self) -> bool {
        !self.password.is_absent() || self.encrypted_password.is_some()
    }

    fn validate(&self) -> Result<()> {
        if self.username.is_empty() || self.username.contains(char::is_whitespace) {
            return Err(Error::validation(
                "username",
                &self.username,
                "must be a single non-empty word",
            ));
        }
        if self.attributes.is_some() && !self.has_login() {
            return Err(Error::validation(
                "password",
                &self.username,
                "attributes need a login user",
            ));
        }
        Ok(())
    }
}

fn as_admin(record: &DomainRecord) -> Result<&AdminUser> {
    match record {
        DomainRecord::AdminUser(u) => Ok(u),
        other => Err(wrong_family("admin_user", other)),
    }
}

fn apply(
    m: &MatchResult,
    users: &mut IndexMap<String, AdminUser>,
    normalizer: &Normalizer,
) -> Result<()> {
    let username = m.require("username")?;
    match (m.pattern.as_str(), m.is_no_form()) {
        ("login_user", true) => {
            users.shift_remove(username);
        }
        ("login_user", false) => {
            let user = users
                .entry(username.to_string())
                .or_insert_with(|| AdminUser::new(username));
            let password = m.require("password")?.to_string();
            if m.flag("encrypted") {
                user.password = DerivableField::NotDerivable;
                user.encrypted_password = Some(password);
            } else {
                user.password = DerivableField::Known(password);
                user.encrypted_password = None;
            }
        }
        ("user_attribute", negated) => {
            let user = users
                .entry(username.to_string())
                .or_insert_with(|| AdminUser::new(username));
            user.attributes = if negated {
                None
            } else {
                Some(UserAttributes::parse(m.require("attributes")?, normalizer)?)
            };
        }
        (other, _) => return Err(Error::UnknownPattern(other.to_string())),
    }
    Ok(())
}

/// Builder and synthesizer for login users.
pub struct AdminUserFamily;

impl RecordFamily for AdminUserFamily {
    fn name(&self) -> &'static str {
        "admin_user"
    }

    fn build(&self, matches: &[MatchResult], cx: &FamilyContext<'_>) -> BuildOutput {
        let mut users: IndexMap<String, AdminUser> = IndexMap::new();
        let mut diagnostics = Vec::new();
        for m in matches {
            if let Err(e) = apply(m, &mut users, cx.normalizer) {
                diagnostics.push(diagnose(m, &e));
            }
        }
        (
            users.into_values().map(DomainRecord::AdminUser).collect(),
            diagnostics,
        )
    }

    fn canonicalize(&self, record: &DomainRecord, cx: &FamilyContext<'_>) -> Result<DomainRecord> {
        let user = as_admin(record)?;
        let attributes = user
            .attributes
            .as_ref()
            .map(|a| -> Result<UserAttributes> {
                UserAttributes::parse(&a.render(cx.normalizer)?, cx.normalizer)
            })
            .transpose()?;
        Ok(DomainRecord::AdminUser(AdminUser {
            attributes,
            ..user.clone()
        }))
    }

    fn synthesize(
        &self,
        desired: &DomainRecord,
        previous: Option<&DomainRecord>,
        cx: &FamilyContext<'_>,
    ) -> Result<Vec<Command>> {
        let desired = as_admin(desired)?;
        let previous = previous.map(as_admin).transpose()?;
        if previous == Some(desired) {
            return Ok(Vec::new());
        }
        desired.validate()?;

        let b = cx.commands();
        let blank = AdminUser::new(desired.username.clone());
        let prev = previous.unwrap_or(&blank);
        let user = values([("username", desired.username.clone())]);
        let mut commands = Vec::new();

        let login = |password: &str, encrypted: bool| {
            let mut v = user.clone();
            v.insert("password".into(), password.to_string());
            if encrypted {
                v.insert("encrypted".into(), "encrypted".to_string());
            }
            b.set("login_user", &v)
        };
        match (&desired.password, &prev.password) {
            // the device only shows a hash, so a known password cannot be compared to it
            (DerivableField::Known(p), DerivableField::Known(old)) if p == old => {}
            (DerivableField::Known(_), DerivableField::NotDerivable) => {}
            (DerivableField::Known(p), _) => commands.push(login(p, false)?),
            (DerivableField::NotDerivable, _) => {
                if let Some(hash) = &desired.encrypted_password {
                    if prev.encrypted_password.as_ref() != Some(hash) {
                        commands.push(login(hash, true)?);
                    }
                }
            }
            (DerivableField::Absent, _) => {
                if desired.encrypted_password.is_none() && prev.has_login() {
                    commands.push(b.no("login_user", &user)?);
                }
            }
        }

        if desired.attributes != prev.attributes {
            match &desired.attributes {
                Some(attrs) => {
                    let mut v = user.clone();
                    v.insert("attributes".into(), attrs.render(cx.normalizer)?);
                    commands.push(b.set("user_attribute", &v)?);
                }
                None => commands.push(b.no("user_attribute", &user)?),
            }
        }
        Ok(commands)
    }

    fn delete(&self, record: &DomainRecord, cx: &FamilyContext<'_>) -> Result<Vec<Command>> {
        let user = as_admin(record)?;
        let b = cx.commands();
        let name = values([("username", user.username.clone())]);
        let mut commands = Vec::new();
        if user.attributes.is_some() {
            commands.push(b.no("user_attribute", &name)?);
        }
        commands.push(b.no("login_user", &name)?);
        Ok(commands)
    }

    /// A declared plaintext password replaces the hash read back.
    fn reconcile(&self, observed: &DomainRecord, declared: &DomainRecord) -> Result<DomainRecord> {
        let merged = crate::reconcile::merge(observed, declared)?;
        let observed = as_admin(observed)?;
        match merged {
            DomainRecord::AdminUser(mut user) => {
                if observed.password.is_not_derivable() && user.password.is_known() {
                    user.encrypted_password = None;
                }
                Ok(DomainRecord::AdminUser(user))
            }
            other => Err(wrong_family("admin_user", &other)),
        }
    }

    fn show_command(&self, record: &DomainRecord) -> String {
        match as_admin(record) {
            Ok(u) => format!("show config | grep \"user.* {}\"", u.username),
            Err(_) => "show config".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::matcher::{MatchOutcome, Matcher};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn fixture() -> (Arc<Catalog>, Normalizer) {
        (Arc::new(Catalog::builtin().unwrap()), Normalizer::builtin())
    }

    fn build(lines: &[&str]) -> Vec<AdminUser> {
        let (catalog, normalizer) = fixture();
        let matcher = Matcher::new(catalog.clone(), &normalizer).unwrap();
        let matches: Vec<MatchResult> = lines
            .iter()
            .map(|l| match matcher.match_text(l) {
                MatchOutcome::Matched(m) => m,
                other => panic!("{}: {:?}", l, other),
            })
            .collect();
        let (records, diags) =
            AdminUserFamily.build(&matches, &FamilyContext::new(&catalog, &normalizer));
        assert!(diags.is_empty(), "{:?}", diags);
        records.iter().map(|r| as_admin(r).unwrap().clone()).collect()
    }

    fn texts(desired: &AdminUser, previous: Option<&AdminUser>) -> Vec<String> {
        let (catalog, normalizer) = fixture();
        let cx = FamilyContext::new(&catalog, &normalizer);
        let previous = previous.cloned().map(DomainRecord::AdminUser);
        AdminUserFamily
            .synthesize(&DomainRecord::AdminUser(desired.clone()), previous.as_ref(), &cx)
            .unwrap()
            .into_iter()
            .map(|c| c.text)
            .collect()
    }

    #[test]
    fn test_encrypted_password_is_not_derivable() {
        let users = build(&[
            "login user admin encrypted 8b6a0c6e4e",
            "user attribute admin administrator=2 connection=serial,telnet,ssh login-timer=300",
        ]);
        let admin = &users[0];
        assert_eq!(admin.password, DerivableField::NotDerivable);
        assert_eq!(admin.encrypted_password.as_deref(), Some("8b6a0c6e4e"));
        let attrs = admin.attributes.as_ref().unwrap();
        assert_eq!(attrs.administrator, Some(true));
        assert_eq!(attrs.connection, vec!["serial", "telnet", "ssh"]);
        assert_eq!(attrs.login_timer, Some(300));
    }

    #[test]
    fn test_round_trip_texts() {
        let users = build(&[
            "login user admin encrypted 8b6a0c6e4e",
            "user attribute admin administrator=on connection=ssh",
        ]);
        assert_eq!(
            texts(&users[0], None),
            vec![
                "login user admin encrypted 8b6a0c6e4e",
                "user attribute admin administrator=on connection=ssh",
            ]
        );
        assert!(texts(&users[0], Some(&users[0])).is_empty());
    }

    #[test]
    fn test_declared_password_survives_reconcile() {
        let observed = build(&["login user operator encrypted abcdef"]).remove(0);
        let mut declared = AdminUser::new("operator");
        declared.password = DerivableField::Known("s3cret".to_string());

        let merged = AdminUserFamily
            .reconcile(
                &DomainRecord::AdminUser(observed.clone()),
                &DomainRecord::AdminUser(declared.clone()),
            )
            .unwrap();
        assert_eq!(merged, DomainRecord::AdminUser(declared.clone()));
        // nothing to send when the only difference is the unreadable password
        assert!(texts(&declared, Some(&observed)).is_empty());
    }

    #[test]
    fn test_new_plaintext_password_and_delete() {
        let mut user = AdminUser::new("operator");
        user.password = DerivableField::Known("s3cret".to_string());
        assert_eq!(texts(&user, None), vec!["login user operator s3cret"]);

        let (catalog, normalizer) = fixture();
        let cx = FamilyContext::new(&catalog, &normalizer);
        user.attributes = Some(UserAttributes::default());
        let texts: Vec<String> = AdminUserFamily
            .delete(&DomainRecord::AdminUser(user), &cx)
            .unwrap()
            .into_iter()
            .map(|c| c.text)
            .collect();
        assert_eq!(texts, vec!["no user attribute operator", "no login user operator"]);
    }
}
