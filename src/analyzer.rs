//! Render analysis
//!
//! Reads collector snapshots, flags components that render too slowly or too
//! often, and ranks them by severity.

use std::fmt;
use std::sync::Arc;

use crate::config::AnalyzerSettings;
use crate::metrics::{ComponentMetrics, MetricsCollector};

/// How often a component rendered in the current sweep window
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RenderFrequency {
    Normal,
    Frequent,
    Excessive,
}

impl RenderFrequency {
    pub fn name(&self) -> &'static str {
        match self {
            RenderFrequency::Normal => "normal",
            RenderFrequency::Frequent => "frequent",
            RenderFrequency::Excessive => "excessive",
        }
    }

    fn weight(&self) -> f64 {
        match self {
            RenderFrequency::Normal => 0.0,
            RenderFrequency::Frequent => 1.0,
            RenderFrequency::Excessive => 2.0,
        }
    }
}

impl fmt::Display for RenderFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An actionable hint for one component
#[derive(Debug, Clone, PartialEq)]
pub enum Suggestion {
    /// Average render time is over budget
    Memoize { average_ms: f64 },
    /// Too many individual renders crossed the slow threshold
    InvestigateSlowPath { slow_ratio: f64 },
    /// The component re-renders far more than it should
    ReduceFrequency { renders_in_window: u64 },
}

impl fmt::Display for Suggestion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Suggestion::Memoize { average_ms } => write!(
                f,
                "memoize expensive renders (average {:.1}ms)",
                average_ms
            ),
            Suggestion::InvestigateSlowPath { slow_ratio } => write!(
                f,
                "investigate slow render path ({:.0}% of renders slow)",
                slow_ratio * 100.0
            ),
            Suggestion::ReduceFrequency { renders_in_window } => write!(
                f,
                "reduce render frequency / hoist state ({} renders this window)",
                renders_in_window
            ),
        }
    }
}

/// Analysis result for one component
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentAnalysis {
    pub component: String,
    pub render_count: u64,
    pub average_render_time: f64,
    pub max_render_time: f64,
    pub render_frequency: RenderFrequency,
    pub suggestions: Vec<Suggestion>,
    pub severity: f64,
}

impl ComponentAnalysis {
    pub fn has_issues(&self) -> bool {
        !self.suggestions.is_empty()
    }
}

/// Read-only view over a collector
#[derive(Debug, Clone)]
pub struct RenderAnalyzer {
    collector: Arc<MetricsCollector>,
    settings: AnalyzerSettings,
}

impl RenderAnalyzer {
    pub fn new(collector: Arc<MetricsCollector>, settings: AnalyzerSettings) -> Self {
        Self {
            collector,
            settings,
        }
    }

    pub fn settings(&self) -> &AnalyzerSettings {
        &self.settings
    }

    pub fn classify_frequency(&self, renders_in_window: u64) -> RenderFrequency {
        if renders_in_window > self.settings.excessive_above {
            RenderFrequency::Excessive
        } else if renders_in_window > self.settings.frequent_above {
            RenderFrequency::Frequent
        } else {
            RenderFrequency::Normal
        }
    }

    /// Analyze one metrics snapshot
    pub fn analyze_metrics(&self, metrics: &ComponentMetrics) -> ComponentAnalysis {
        let average = metrics.average_render_time();
        let frequency = self.classify_frequency(metrics.renders_in_window);

        let mut suggestions = Vec::new();
        if average > self.settings.slow_average_ms {
            suggestions.push(Suggestion::Memoize {
                average_ms: average,
            });
        }
        let slow_ratio = metrics.slow_ratio();
        if slow_ratio > self.settings.slow_ratio {
            suggestions.push(Suggestion::InvestigateSlowPath { slow_ratio });
        }
        if frequency == RenderFrequency::Excessive {
            suggestions.push(Suggestion::ReduceFrequency {
                renders_in_window: metrics.renders_in_window,
            });
        }

        let severity =
            frequency.weight() * 10.0 + average.min(self.settings.severity_time_cap_ms);

        ComponentAnalysis {
            component: metrics.component.clone(),
            render_count: metrics.render_count,
            average_render_time: average,
            max_render_time: metrics.max_render_time,
            render_frequency: frequency,
            suggestions,
            severity,
        }
    }

    /// Analyze a single component by name
    pub fn analyze(&self, component: &str) -> Option<ComponentAnalysis> {
        self.collector
            .get_metrics(component)
            .map(|metrics| self.analyze_metrics(&metrics))
    }

    /// Every tracked component, most severe first
    pub fn analyze_all(&self) -> Vec<ComponentAnalysis> {
        let snapshot = self.collector.get_all_metrics();
        let mut analyses: Vec<ComponentAnalysis> = snapshot
            .values()
            .map(|metrics| self.analyze_metrics(metrics))
            .collect();
        sort_by_severity(&mut analyses);
        analyses
    }

    /// Components with at least one suggestion, most severe first
    pub fn find_components_with_performance_issues(&self) -> Vec<ComponentAnalysis> {
        let mut analyses = self.analyze_all();
        analyses.retain(ComponentAnalysis::has_issues);
        analyses
    }

    pub fn clear_history(&self) {
        self.collector.reset();
    }

    /// Plain-text table of the components with issues
    pub fn report(&self) -> String {
        format_report(&self.find_components_with_performance_issues())
    }
}

/// Descending severity; ties broken by name for a stable order
fn sort_by_severity(analyses: &mut [ComponentAnalysis]) {
    analyses.sort_by(|a, b| {
        b.severity
            .total_cmp(&a.severity)
            .then_with(|| a.component.cmp(&b.component))
    });
}

/// Render analyses as a plain-text report
pub fn format_report(analyses: &[ComponentAnalysis]) -> String {
    if analyses.is_empty() {
        return "no performance issues detected".to_string();
    }

    let mut out = String::new();
    for analysis in analyses {
        out.push_str(&format!(
            "{} renders={} avg={:.1}ms max={:.1}ms freq={} severity={:.1}\n",
            analysis.component,
            analysis.render_count,
            analysis.average_render_time,
            analysis.max_render_time,
            analysis.render_frequency,
            analysis.severity,
        ));
        for suggestion in &analysis.suggestions {
            out.push_str(&format!("  - {}\n", suggestion));
        }
    }
    out.truncate(out.trim_end().len());
    out
}
