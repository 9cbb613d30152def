//! The configuration engine.
//!
//! [`Engine`] owns everything a parse or a synthesis needs: the catalog, the
//! normalizer, the compiled matcher, the line preprocessor and the family
//! registry. It is built once and shared; every operation is a pure function
//! of its arguments.

use crate::catalog::Catalog;
use crate::collision::{self, CollisionReport, OwnedRange, SequenceRange};
use crate::config::EngineConfig;
use crate::error::{Diagnostic, DiagnosticKind, Error, Result};
use crate::family::{FamilyContext, FamilyRegistry};
use crate::matcher::{MatchOutcome, MatchResult, Matcher};
use crate::normalize::Normalizer;
use crate::preprocess::Preprocessor;
use crate::record::{DomainRecord, RecordKey};
use crate::sequence::{SequenceAllocator, SequencePolicy};
use crate::synth::{self, Command};
use indexmap::IndexMap;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Records and per-line diagnostics read from one configuration text.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ParseOutput {
    pub records: Vec<DomainRecord>,
    pub diagnostics: Vec<Diagnostic>,
}

impl ParseOutput {
    /// The record with the given identity, if it was read.
    pub fn find(&self, key: &RecordKey) -> Option<&DomainRecord> {
        self.records.iter().find(|r| &r.key() == key)
    }

    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

/// Open `tunnel select`-style context while walking the lines.
struct OpenContext {
    name: String,
    line: usize,
}

/// Parser and command synthesizer for RTX configuration text.
pub struct Engine {
    catalog: Arc<Catalog>,
    normalizer: Normalizer,
    matcher: Matcher,
    preprocessor: Preprocessor,
    registry: FamilyRegistry,
    allocator: SequenceAllocator,
}

impl Engine {
    /// An engine over the embedded catalog with default settings.
    pub fn builtin() -> Result<Self> {
        Self::from_config(&EngineConfig::default())
    }

    /// An engine configured from a loaded [`EngineConfig`].
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        let catalog = match &config.catalog.path {
            Some(path) => Catalog::from_file(path)?,
            None => Catalog::builtin()?,
        };
        let preprocessor = Preprocessor::from_catalog(&catalog, &config.preprocessor);
        Self::assemble(
            catalog,
            preprocessor,
            SequenceAllocator::from_config(&config.sequence),
        )
    }

    /// An engine over a caller-supplied catalog.
    pub fn with_catalog(catalog: Catalog) -> Result<Self> {
        let preprocessor = Preprocessor::from_catalog(&catalog, &Default::default());
        Self::assemble(catalog, preprocessor, SequenceAllocator::default())
    }

    fn assemble(
        catalog: Catalog,
        preprocessor: Preprocessor,
        allocator: SequenceAllocator,
    ) -> Result<Self> {
        let catalog = Arc::new(catalog);
        let normalizer = Normalizer::builtin();
        let matcher = Matcher::new(catalog.clone(), &normalizer)?;
        matcher.verify_examples()?;

        let registry = FamilyRegistry::with_builtins();
        for family in catalog.families() {
            registry.require(family)?;
        }

        info!(
            version = catalog.version(),
            patterns = catalog.len(),
            "Engine ready"
        );
        Ok(Self {
            catalog,
            normalizer,
            matcher,
            preprocessor,
            registry,
            allocator,
        })
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    pub fn allocator(&self) -> &SequenceAllocator {
        &self.allocator
    }

    fn context(&self) -> FamilyContext<'_> {
        FamilyContext::new(&self.catalog, &self.normalizer)
    }

    // ========================================================================
    // Parsing
    // ========================================================================

    /// Reads a configuration text into records.
    ///
    /// Lines that cannot be read are reported as diagnostics and skipped;
    /// the rest of the text is still parsed.
    pub fn parse(&self, raw: &str) -> ParseOutput {
        let (lines, mut diagnostics) = self.preprocessor.reconstruct_lines(raw);
        let mut matches: Vec<MatchResult> = Vec::new();
        let mut open: Option<OpenContext> = None;

        for line in &lines {
            if line.malformed {
                open = None;
                continue;
            }
            match self.matcher.match_line(line) {
                MatchOutcome::Matched(mut m) => {
                    let pattern = self.catalog.pattern(&m.pattern).ok();
                    let opens = pattern.and_then(|p| p.opens_context.clone());
                    let within = pattern.and_then(|p| p.context.clone());

                    if let Some(name) = opens {
                        open = (!m.is_no_form()).then(|| OpenContext {
                            name,
                            line: m.line,
                        });
                    } else if let Some(name) = within {
                        match &open {
                            Some(ctx) if ctx.name == name => m.context_line = Some(ctx.line),
                            _ => {
                                warn!(line = m.line, pattern = %m.pattern, "Sub-option outside its context");
                                diagnostics.push(Diagnostic::new(
                                    m.line,
                                    DiagnosticKind::Validation,
                                    format!("'{}' appears outside a {} context", m.pattern, name),
                                    &m.text,
                                ));
                                continue;
                            }
                        }
                    } else if !m.indented {
                        open = None;
                    }
                    debug!(line = m.line, pattern = %m.pattern, "Line matched");
                    matches.push(m);
                }
                MatchOutcome::Unknown => {
                    debug!(line = line.line, "No pattern matches");
                    if !line.indented {
                        open = None;
                    }
                    diagnostics.push(Diagnostic::from_error(
                        line.line,
                        &line.text,
                        &Error::UnknownPattern(line.text.clone()),
                    ));
                }
                MatchOutcome::Ambiguous(patterns) => {
                    warn!(line = line.line, patterns = ?patterns, "Ambiguous line");
                    if !line.indented {
                        open = None;
                    }
                    diagnostics.push(Diagnostic::from_error(
                        line.line,
                        &line.text,
                        &Error::AmbiguousMatch {
                            line: line.text.clone(),
                            patterns,
                        },
                    ));
                }
                MatchOutcome::Invalid(e) => {
                    if e.is_recoverable() {
                        debug!(line = line.line, error = %e, "Line rejected");
                    } else {
                        warn!(line = line.line, error = %e, "Line value rejected");
                    }
                    if !line.indented {
                        open = None;
                    }
                    diagnostics.push(Diagnostic::from_error(line.line, &line.text, &e));
                }
            }
        }

        let mut grouped: IndexMap<&str, Vec<MatchResult>> = self
            .catalog
            .families()
            .into_iter()
            .map(|f| (f, Vec::new()))
            .collect();
        for m in matches {
            if let Some(group) = grouped.get_mut(m.family.as_str()) {
                group.push(m);
            }
        }

        let cx = self.context();
        let mut records = Vec::new();
        for (family, group) in grouped {
            if group.is_empty() {
                continue;
            }
            let Some(builder) = self.registry.get(family) else {
                continue;
            };
            let (built, problems) = builder.build(&group, &cx);
            records.extend(built);
            diagnostics.extend(problems);
        }

        diagnostics.sort_by_key(|d| d.line);
        info!(
            records = records.len(),
            diagnostics = diagnostics.len(),
            "Parsed configuration"
        );
        ParseOutput {
            records,
            diagnostics,
        }
    }

    // ========================================================================
    // Synthesis
    // ========================================================================

    /// Canonical form of a caller-supplied record.
    pub fn canonicalize(&self, record: &DomainRecord) -> Result<DomainRecord> {
        self.registry
            .require(record.family())?
            .canonicalize(record, &self.context())
    }

    /// Commands that move the device from `previous` to `desired`, in
    /// catalog order.
    pub fn synthesize_commands(
        &self,
        desired: &DomainRecord,
        previous: Option<&DomainRecord>,
    ) -> Result<Vec<Command>> {
        let family = self.registry.require(desired.family())?;
        let cx = self.context();
        let desired = family.canonicalize(desired, &cx)?;
        let previous = previous
            .map(|p| {
                if p.key() != desired.key() {
                    return Err(Error::validation(
                        "key",
                        desired.key().to_string(),
                        format!("previous state belongs to {}", p.key()),
                    ));
                }
                family.canonicalize(p, &cx)
            })
            .transpose()?;

        let mut commands = family.synthesize(&desired, previous.as_ref(), &cx)?;
        synth::order(&mut commands, &self.catalog);
        debug!(record = %desired.key(), commands = commands.len(), "Synthesized");
        Ok(commands)
    }

    /// Command texts that move the device from `previous` to `desired`.
    pub fn synthesize(
        &self,
        desired: &DomainRecord,
        previous: Option<&DomainRecord>,
    ) -> Result<Vec<String>> {
        Ok(self
            .synthesize_commands(desired, previous)?
            .into_iter()
            .map(|c| c.text)
            .collect())
    }

    /// Command texts that remove the record from the device, in the
    /// family's teardown order: a context is entered first and its own
    /// no-form comes last.
    pub fn delete(&self, record: &DomainRecord) -> Result<Vec<String>> {
        let family = self.registry.require(record.family())?;
        let cx = self.context();
        let record = family.canonicalize(record, &cx)?;
        Ok(family
            .delete(&record, &cx)?
            .into_iter()
            .map(|c| c.text)
            .collect())
    }

    /// Commands for a whole desired configuration against what the device
    /// currently holds. Records only present on the device are left alone.
    pub fn plan(&self, desired: &[DomainRecord], current: &[DomainRecord]) -> Result<Vec<String>> {
        let mut out = Vec::new();
        for record in desired {
            let key = record.key();
            let previous = current.iter().find(|c| c.key() == key);
            out.extend(self.synthesize(record, previous)?);
        }
        info!(records = desired.len(), commands = out.len(), "Planned changes");
        Ok(out)
    }

    /// Merges a freshly read record with the declared one.
    pub fn reconcile(&self, observed: &DomainRecord, declared: &DomainRecord) -> Result<DomainRecord> {
        self.registry
            .require(observed.family())?
            .reconcile(observed, declared)
    }

    /// Command whose output shows the record.
    pub fn show_command(&self, record: &DomainRecord) -> Result<String> {
        Ok(self.registry.require(record.family())?.show_command(record))
    }

    // ========================================================================
    // Sequences
    // ========================================================================

    pub fn allocate_sequence(&self, policy: &SequencePolicy, count: usize) -> Result<Vec<u32>> {
        self.allocator.allocate(policy, count)
    }

    /// Checks a candidate range against its declared siblings and then
    /// against the device. The device is only asked when the siblings are
    /// clear.
    pub fn check_collision<F, E>(
        &self,
        candidate: &OwnedRange,
        siblings: &[OwnedRange],
        previously_owned: &[SequenceRange],
        device_query: F,
    ) -> Result<CollisionReport>
    where
        F: FnOnce() -> std::result::Result<Vec<SequenceRange>, E>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let report = collision::check_against_siblings(candidate, siblings);
        if !report.is_clear() {
            return Ok(report);
        }
        collision::check_against_device(candidate, previously_owned, device_query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::family::tunnel::Tunnel;
    use crate::record::DerivableField;
    use pretty_assertions::assert_eq;

    const TUNNEL: &str = "\
tunnel select 1
 tunnel encapsulation ipsec
 ipsec tunnel 101
  ipsec sa policy 101 1 esp aes-cbc sha-hmac
  ipsec ike pre-shared-key 1 text secret
 ip tunnel tcp mss limit auto
 tunnel enable 1
ip route default gateway pp 1
";

    fn engine() -> Engine {
        Engine::builtin().unwrap()
    }

    // ========================================================================
    // Parsing
    // ========================================================================

    #[test]
    fn test_parse_tunnel_context() {
        let out = engine().parse(TUNNEL);
        assert!(out.is_clean(), "{:?}", out.diagnostics);
        let tunnel = out
            .find(&RecordKey::new("tunnel", "1"))
            .expect("tunnel 1");
        match tunnel {
            DomainRecord::Tunnel(t) => {
                assert!(t.enabled);
                let ipsec = t.ipsec.as_ref().unwrap();
                assert_eq!(ipsec.sa_policy_id, Some(101));
                assert_eq!(ipsec.pre_shared_key, DerivableField::NotDerivable);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(out.find(&RecordKey::new("static_route", "default")).is_some());
    }

    #[test]
    fn test_orphan_sub_option_is_reported() {
        let out = engine().parse("ip route default gateway pp 1\nipsec tunnel 101\n");
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.diagnostics.len(), 1);
        assert_eq!(out.diagnostics[0].line, 2);
        assert_eq!(out.diagnostics[0].kind, DiagnosticKind::Validation);
    }

    #[test]
    fn test_unknown_lines_do_not_stop_parsing() {
        let out = engine().parse("bogus command\ndns domain example.com\nanother bogus\n");
        assert_eq!(out.records.len(), 1);
        let lines: Vec<usize> = out.diagnostics.iter().map(|d| d.line).collect();
        assert_eq!(lines, vec![1, 3]);
        assert!(out
            .diagnostics
            .iter()
            .all(|d| d.kind == DiagnosticKind::UnknownPattern));
    }

    // ========================================================================
    // Synthesis
    // ========================================================================

    #[test]
    fn test_synthesize_unchanged_is_empty() {
        let engine = engine();
        let out = engine.parse(TUNNEL);
        for record in &out.records {
            assert!(engine.synthesize(record, Some(record)).unwrap().is_empty());
        }
    }

    #[test]
    fn test_synthesize_rejects_mismatched_previous() {
        let engine = engine();
        let a = DomainRecord::Tunnel(Tunnel::new(1));
        let b = DomainRecord::Tunnel(Tunnel::new(2));
        assert!(matches!(
            engine.synthesize(&a, Some(&b)),
            Err(Error::Validation { .. })
        ));
    }

    #[test]
    fn test_delete_tunnel_ends_with_no_select() {
        let engine = engine();
        let out = engine.parse(TUNNEL);
        let tunnel = out.find(&RecordKey::new("tunnel", "1")).unwrap();
        let commands = engine.delete(tunnel).unwrap();
        assert_eq!(commands.first().map(String::as_str), Some("tunnel select 1"));
        assert_eq!(commands.last().map(String::as_str), Some("no tunnel select 1"));
    }

    #[test]
    fn test_delete_outside_a_context_is_only_no_forms() {
        let engine = engine();
        let out = engine.parse("dns server 8.8.8.8\ndns static a.home 10.0.0.1\n");
        let dns = out.find(&RecordKey::new("dns", "dns")).unwrap();
        let commands = engine.delete(dns).unwrap();
        assert!(!commands.is_empty());
        assert!(commands.iter().all(|c| c.starts_with("no ")), "{:?}", commands);
    }

    #[test]
    fn test_check_collision_skips_device_when_siblings_conflict() {
        let engine = engine();
        let candidate = OwnedRange::new("b", SequenceRange::new(510, 530));
        let siblings = [OwnedRange::new("a", SequenceRange::new(500, 520))];
        let report = engine
            .check_collision(&candidate, &siblings, &[], || -> std::result::Result<Vec<SequenceRange>, std::io::Error> {
                panic!("device must not be queried")
            })
            .unwrap();
        assert!(!report.is_clear());
    }
}
