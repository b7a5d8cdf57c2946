use crate::aggregate::GroupKey;
use crate::error::{ReportError, Result};
use crate::targets::{
    COLLECTION_TARGET, COLLECTION_TARGETS, DISBURSEMENT_TARGETS, MONTHLY_TARGET, MTD_TARGET,
};
use crate::window::WindowKind;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Optional descriptive fields carried by a loan record.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    LoanOfficer,
    Collector,
    Product,
    Client,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum BranchColumnKind {
    #[schemars(description = "The column holds numeric branch codes resolved through the branch table.")]
    Code,

    #[schemars(description = "The column already holds branch names.")]
    Name,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    Delimited,
    Spreadsheet,
}

impl SourceFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "csv" | "tsv" | "txt" => Some(Self::Delimited),
            "xlsx" | "xlsm" | "xlsb" | "xls" | "ods" => Some(Self::Spreadsheet),
            _ => None,
        }
    }
}

/// Which branches a report section looks at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum BranchScope {
    #[default]
    All,
    Exclude { branches: Vec<String> },
    Only { branch: String },
}

impl BranchScope {
    pub fn admits(&self, branch: &str) -> bool {
        match self {
            Self::All => true,
            Self::Exclude { branches } => !branches.iter().any(|b| b == branch),
            Self::Only { branch: only } => only == branch,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BranchMapping {
    pub code: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TargetTableSpec {
    #[schemars(description = "Names of the target columns, e.g. [\"monthly\", \"mtd\"].")]
    pub columns: Vec<String>,

    #[schemars(
        description = "Branch name to target values. Branches not listed have no target and are left out of target comparisons."
    )]
    pub entries: BTreeMap<String, BTreeMap<String, f64>>,
}

/// Static reference data: the branch code table and the per-branch targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ReferenceData {
    pub branches: Vec<BranchMapping>,

    #[schemars(description = "Target tables keyed by name (\"disbursement\", \"collection\").")]
    pub targets: BTreeMap<String, TargetTableSpec>,
}

impl Default for ReferenceData {
    fn default() -> Self {
        let branches = [
            (12936, "BURUBURU BRANCH"),
            (27504, "Kentsewe Branch"),
            (63796, "Kiambu Branch"),
            (27133, "KIlimani Branch"),
            (77791, "Kitengela Branch"),
            (8678, "Mombasa Road"),
            (75092, "P.C Insurance Agency"),
            (59535, "TECH AND DEMO ACCOUNT"),
            (75350, "Thika Branch"),
            (8550, "TOWN BRANCH"),
            (55886, "Utawala Branch"),
        ]
        .into_iter()
        .map(|(code, name)| BranchMapping {
            code,
            name: name.to_string(),
        })
        .collect();

        let disbursement = [
            ("BURUBURU BRANCH", 19_000_000.00, 11_952_952.96),
            ("Kiambu Branch", 19_000_000.00, 11_256_256.30),
            ("KIlimani Branch", 16_000_000.00, 10_074_074.07),
            ("Kitengela Branch", 7_000_000.00, 4_407_407.41),
            ("Thika Branch", 7_000_000.00, 4_407_407.41),
            ("Utawala Branch", 19_000_000.00, 11_952_952.96),
        ]
        .into_iter()
        .map(|(branch, monthly, mtd)| {
            let values = BTreeMap::from([
                (MONTHLY_TARGET.to_string(), monthly),
                (MTD_TARGET.to_string(), mtd),
            ]);
            (branch.to_string(), values)
        })
        .collect();

        let collection = [
            ("BURUBURU BRANCH", 17_656_540.5),
            ("Kiambu Branch", 11_088_520.2),
            ("KIlimani Branch", 13_803_121.6),
            ("Thika Branch", 1_049_290.77),
            ("TOWN BRANCH", 18_708_150.1),
            ("Utawala Branch", 8_869_743.78),
        ]
        .into_iter()
        .map(|(branch, target)| {
            let values = BTreeMap::from([(COLLECTION_TARGET.to_string(), target)]);
            (branch.to_string(), values)
        })
        .collect();

        let targets = BTreeMap::from([
            (
                DISBURSEMENT_TARGETS.to_string(),
                TargetTableSpec {
                    columns: vec![MONTHLY_TARGET.to_string(), MTD_TARGET.to_string()],
                    entries: disbursement,
                },
            ),
            (
                COLLECTION_TARGETS.to_string(),
                TargetTableSpec {
                    columns: vec![COLLECTION_TARGET.to_string()],
                    entries: collection,
                },
            ),
        ]);

        Self { branches, targets }
    }
}

/// Describes one input file and how its columns map onto loan record fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SourceSpec {
    #[schemars(description = "Unique name used by report sections to refer to this source.")]
    pub name: String,

    #[schemars(description = "File path, relative to the configured data directory.")]
    pub path: PathBuf,

    #[serde(default)]
    #[schemars(description = "File format. Inferred from the file extension when omitted.")]
    pub format: Option<SourceFormat>,

    #[serde(default)]
    #[schemars(description = "Worksheet to read. Defaults to the first sheet of the workbook.")]
    pub sheet: Option<String>,

    pub branch_column: String,

    pub branch_kind: BranchColumnKind,

    #[schemars(description = "Logical date name to column header, e.g. {\"disbursed\": \"Disbursed Date\"}.")]
    pub date_columns: BTreeMap<String, String>,

    #[serde(default)]
    #[schemars(
        description = "chrono format strings tried in order for text dates. Empty means the built-in list (dd/mm/yyyy first)."
    )]
    pub date_formats: Vec<String>,

    #[schemars(description = "Logical measure name to column header, e.g. {\"disbursed\": \"Disbursed\"}.")]
    pub measure_columns: BTreeMap<String, String>,

    #[serde(default)]
    pub dimension_columns: BTreeMap<Dimension, String>,
}

impl SourceSpec {
    pub fn resolved_format(&self) -> Result<SourceFormat> {
        self.format
            .or_else(|| SourceFormat::from_path(&self.path))
            .ok_or_else(|| ReportError::UnsupportedFormat(self.path.display().to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LeaderboardSpec {
    #[serde(default = "default_leaderboard_key")]
    pub group_key: GroupKey,

    #[serde(default)]
    #[schemars(description = "Measure to rank by. Defaults to the section's primary measure.")]
    pub measure: Option<String>,

    pub top_n: usize,
}

fn default_leaderboard_key() -> GroupKey {
    GroupKey::Dimension(Dimension::LoanOfficer)
}

/// One branch-performance view: a windowed aggregate, optional target comparison and
/// a daily trend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SectionSpec {
    pub name: String,

    pub source: String,

    #[schemars(description = "Logical date used for windowing and for the daily trend.")]
    pub date_column: String,

    #[schemars(description = "Measures to aggregate. The first one orders the table and drives targets and trends.")]
    pub measures: Vec<String>,

    #[serde(default)]
    #[schemars(description = "Window applied before aggregation. Omit to aggregate every record.")]
    pub window: Option<WindowKind>,

    #[serde(default)]
    #[schemars(description = "Window for the daily trend. Defaults to the section window.")]
    pub trend_window: Option<WindowKind>,

    #[serde(default)]
    pub target_table: Option<String>,

    #[serde(default)]
    pub scope: BranchScope,

    #[serde(default)]
    pub leaderboard: Option<LeaderboardSpec>,

    #[serde(default)]
    #[schemars(description = "Include the windowed loan records, largest primary measure first.")]
    pub detail_listing: bool,
}

impl SectionSpec {
    pub fn primary_measure(&self) -> Option<&str> {
        self.measures.first().map(String::as_str)
    }
}

/// Two sections whose daily trends are merged into one dual series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TrendComparisonSpec {
    pub name: String,
    pub first: String,
    pub second: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PortfolioColumns {
    pub disbursed: String,
    pub repaid: String,
    pub outstanding: String,
    pub expected: String,
}

/// Portfolio KPIs compared between the same period last month and the full prior month.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PortfolioSpec {
    pub source: String,
    pub date_column: String,
    pub columns: PortfolioColumns,
    #[serde(default)]
    pub scope: BranchScope,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ReportConfig {
    #[serde(default)]
    #[schemars(description = "Directory that source paths are resolved against.")]
    pub data_dir: Option<PathBuf>,

    #[serde(default)]
    pub reference: ReferenceData,

    pub sources: Vec<SourceSpec>,

    pub sections: Vec<SectionSpec>,

    #[serde(default)]
    pub comparisons: Vec<TrendComparisonSpec>,

    #[serde(default)]
    pub portfolio: Option<PortfolioSpec>,
}

impl ReportConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn source(&self, name: &str) -> Option<&SourceSpec> {
        self.sources.iter().find(|s| s.name == name)
    }

    pub fn section(&self, name: &str) -> Option<&SectionSpec> {
        self.sections.iter().find(|s| s.name == name)
    }

    pub fn validate(&self) -> Result<()> {
        let mut source_names = BTreeSet::new();
        for source in &self.sources {
            if !source_names.insert(source.name.as_str()) {
                return Err(ReportError::InvalidConfig(format!(
                    "Duplicate source name '{}'",
                    source.name
                )));
            }
            if source.measure_columns.is_empty() {
                return Err(ReportError::InvalidConfig(format!(
                    "Source '{}' declares no measure columns",
                    source.name
                )));
            }
            source.resolved_format()?;
        }

        let mut section_names = BTreeSet::new();
        for section in &self.sections {
            if !section_names.insert(section.name.as_str()) {
                return Err(ReportError::InvalidConfig(format!(
                    "Duplicate section name '{}'",
                    section.name
                )));
            }
            let source = self.source(&section.source).ok_or_else(|| {
                ReportError::InvalidConfig(format!(
                    "Section '{}' refers to unknown source '{}'",
                    section.name, section.source
                ))
            })?;
            if section.measures.is_empty() {
                return Err(ReportError::InvalidConfig(format!(
                    "Section '{}' has no measures",
                    section.name
                )));
            }
            if let Some(missing) = section
                .measures
                .iter()
                .find(|m| !source.measure_columns.contains_key(*m))
            {
                return Err(ReportError::InvalidConfig(format!(
                    "Section '{}' uses measure '{}' not declared by source '{}'",
                    section.name, missing, source.name
                )));
            }
            if !source.date_columns.contains_key(&section.date_column) {
                return Err(ReportError::InvalidConfig(format!(
                    "Section '{}' uses date '{}' not declared by source '{}'",
                    section.name, section.date_column, source.name
                )));
            }
            if let Some(table) = &section.target_table {
                if !self.reference.targets.contains_key(table) {
                    return Err(ReportError::InvalidConfig(format!(
                        "Section '{}' refers to unknown target table '{}'",
                        section.name, table
                    )));
                }
            }
            for kind in section.window.iter().chain(section.trend_window.iter()) {
                kind.validate()?;
            }
            if let Some(measure) = section.leaderboard.as_ref().and_then(|l| l.measure.as_ref()) {
                if !source.measure_columns.contains_key(measure) {
                    return Err(ReportError::InvalidConfig(format!(
                        "Section '{}' ranks by measure '{}' not declared by source '{}'",
                        section.name, measure, source.name
                    )));
                }
            }
        }

        for comparison in &self.comparisons {
            for side in [&comparison.first, &comparison.second] {
                if self.section(side).is_none() {
                    return Err(ReportError::InvalidConfig(format!(
                        "Comparison '{}' refers to unknown section '{}'",
                        comparison.name, side
                    )));
                }
            }
        }

        if let Some(portfolio) = &self.portfolio {
            let source = self.source(&portfolio.source).ok_or_else(|| {
                ReportError::InvalidConfig(format!(
                    "Portfolio refers to unknown source '{}'",
                    portfolio.source
                ))
            })?;
            if !source.date_columns.contains_key(&portfolio.date_column) {
                return Err(ReportError::InvalidConfig(format!(
                    "Portfolio uses date '{}' not declared by source '{}'",
                    portfolio.date_column, source.name
                )));
            }
            let columns = &portfolio.columns;
            for measure in [
                &columns.disbursed,
                &columns.repaid,
                &columns.outstanding,
                &columns.expected,
            ] {
                if !source.measure_columns.contains_key(measure) {
                    return Err(ReportError::InvalidConfig(format!(
                        "Portfolio uses measure '{}' not declared by source '{}'",
                        measure, source.name
                    )));
                }
            }
        }

        for (name, table) in &self.reference.targets {
            for (branch, values) in &table.entries {
                if let Some((column, value)) =
                    values.iter().find(|(_, v)| !v.is_finite() || **v < 0.0)
                {
                    return Err(ReportError::InvalidConfig(format!(
                        "Target '{}' for '{}' in table '{}' must be a non-negative number (got {})",
                        column, branch, name, value
                    )));
                }
            }
        }

        Ok(())
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(ReportConfig)
    }

    pub fn schema_as_json() -> std::result::Result<String, serde_json::Error> {
        let schema = Self::generate_json_schema();
        serde_json::to_string_pretty(&schema)
    }

    /// The Logbook, Zidisha and Advans report layout over files in `data_dir`.
    pub fn builtin(data_dir: impl Into<PathBuf>) -> Self {
        let advans = "Advans Branch".to_string();
        let not_advans = BranchScope::Exclude {
            branches: vec![advans.clone()],
        };
        let only_advans = BranchScope::Only { branch: advans };

        let logbook_disbursements = SourceSpec {
            name: "logbook_disbursements".to_string(),
            path: PathBuf::from("logbook_disbursements.xlsx"),
            format: None,
            sheet: None,
            branch_column: "Branch".to_string(),
            branch_kind: BranchColumnKind::Code,
            date_columns: string_map(&[("disbursed", "Disbursed Date")]),
            date_formats: vec!["%d/%m/%Y".to_string()],
            measure_columns: string_map(&[("disbursed", "Disbursed")]),
            dimension_columns: BTreeMap::new(),
        };

        let logbook_repayments = SourceSpec {
            name: "logbook_repayments".to_string(),
            path: PathBuf::from("logbookrepayments.csv"),
            format: None,
            sheet: None,
            branch_column: "branch_id".to_string(),
            branch_kind: BranchColumnKind::Code,
            date_columns: string_map(&[("collected", "repayment_collected_date")]),
            date_formats: vec!["%d/%m/%Y".to_string()],
            measure_columns: string_map(&[("repaid", "repayment_amount")]),
            dimension_columns: BTreeMap::from([(Dimension::Collector, "collector_id".to_string())]),
        };

        let zidisha = SourceSpec {
            name: "zidisha".to_string(),
            path: PathBuf::from("zidisha.xlsx"),
            format: None,
            sheet: None,
            branch_column: "Branch Name".to_string(),
            branch_kind: BranchColumnKind::Name,
            date_columns: string_map(&[
                ("disbursed", "Disbursed On Date"),
                ("maturity", "Expected Matured On Date"),
            ]),
            date_formats: Vec::new(),
            measure_columns: string_map(&[
                ("principal", "Principal Amount"),
                ("repaid", "Total Repayment Derived"),
                ("outstanding", "Total Outstanding Derived"),
                ("expected", "Total Expected Repayment Derived"),
            ]),
            dimension_columns: BTreeMap::from([
                (Dimension::LoanOfficer, "Loan Officer Name".to_string()),
                (Dimension::Product, "Product Name".to_string()),
                (Dimension::Client, "Client Name".to_string()),
            ]),
        };

        let trailing_30 = Some(WindowKind::TrailingDays { days: 30 });
        let section = |name: &str, source: &str, date: &str, measure: &str| SectionSpec {
            name: name.to_string(),
            source: source.to_string(),
            date_column: date.to_string(),
            measures: vec![measure.to_string()],
            window: None,
            trend_window: None,
            target_table: None,
            scope: BranchScope::All,
            leaderboard: None,
            detail_listing: false,
        };

        let sections = vec![
            SectionSpec {
                trend_window: trailing_30.clone(),
                target_table: Some(DISBURSEMENT_TARGETS.to_string()),
                ..section(
                    "logbook_disbursements",
                    "logbook_disbursements",
                    "disbursed",
                    "disbursed",
                )
            },
            SectionSpec {
                trend_window: trailing_30,
                target_table: Some(COLLECTION_TARGETS.to_string()),
                leaderboard: Some(LeaderboardSpec {
                    group_key: GroupKey::Dimension(Dimension::Collector),
                    measure: None,
                    top_n: 10,
                }),
                ..section(
                    "logbook_collections",
                    "logbook_repayments",
                    "collected",
                    "repaid",
                )
            },
            SectionSpec {
                window: Some(WindowKind::CurrentMonth),
                scope: not_advans.clone(),
                leaderboard: Some(LeaderboardSpec {
                    group_key: GroupKey::Dimension(Dimension::LoanOfficer),
                    measure: None,
                    top_n: 10,
                }),
                ..section("zidisha_disbursements", "zidisha", "disbursed", "principal")
            },
            SectionSpec {
                window: Some(WindowKind::WholeCurrentMonth),
                scope: not_advans.clone(),
                ..section("zidisha_collections", "zidisha", "maturity", "repaid")
            },
            SectionSpec {
                window: Some(WindowKind::CurrentMonth),
                scope: only_advans.clone(),
                detail_listing: true,
                ..section("advans_disbursements", "zidisha", "disbursed", "principal")
            },
            SectionSpec {
                window: Some(WindowKind::WholeCurrentMonth),
                scope: only_advans,
                detail_listing: true,
                ..section("advans_collections", "zidisha", "maturity", "repaid")
            },
        ];

        Self {
            data_dir: Some(data_dir.into()),
            reference: ReferenceData::default(),
            sources: vec![logbook_disbursements, logbook_repayments, zidisha],
            sections,
            comparisons: vec![TrendComparisonSpec {
                name: "logbook_disbursed_vs_collected".to_string(),
                first: "logbook_disbursements".to_string(),
                second: "logbook_collections".to_string(),
            }],
            portfolio: Some(PortfolioSpec {
                source: "zidisha".to_string(),
                date_column: "disbursed".to_string(),
                columns: PortfolioColumns {
                    disbursed: "principal".to_string(),
                    repaid: "repaid".to_string(),
                    outstanding: "outstanding".to_string(),
                    expected: "expected".to_string(),
                },
                scope: not_advans,
            }),
        }
    }
}

fn string_map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_config_is_valid() {
        let config = ReportConfig::builtin("data");
        config.validate().unwrap();
        assert_eq!(config.sources.len(), 3);
        assert_eq!(config.sections.len(), 6);
        assert_eq!(
            config.source("logbook_repayments").unwrap().resolved_format().unwrap(),
            SourceFormat::Delimited
        );
    }

    #[test]
    fn test_schema_generation() {
        let schema_json = ReportConfig::schema_as_json().unwrap();
        assert!(schema_json.contains("sources"));
        assert!(schema_json.contains("sections"));
        assert!(schema_json.contains("branch_kind"));
    }

    #[test]
    fn test_json_round_trip_keeps_reference_data() {
        let config = ReportConfig::builtin("data");
        let json = serde_json::to_string_pretty(&config).unwrap();
        let parsed = ReportConfig::from_json_str(&json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_validate_rejects_unknown_measure() {
        let mut config = ReportConfig::builtin("data");
        config.sections[0].measures = vec!["principal".to_string()];
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ReportError::InvalidConfig(_)));
    }

    #[test]
    fn test_validate_rejects_negative_target() {
        let mut config = ReportConfig::builtin("data");
        config
            .reference
            .targets
            .get_mut(COLLECTION_TARGETS)
            .unwrap()
            .entries
            .insert(
                "Kiambu Branch".to_string(),
                BTreeMap::from([(COLLECTION_TARGET.to_string(), -1.0)]),
            );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_portfolio_columns() {
        let mut config = ReportConfig::builtin("data");
        if let Some(portfolio) = config.portfolio.as_mut() {
            portfolio.columns.expected = "expected_repayment".to_string();
        }
        assert!(matches!(config.validate(), Err(ReportError::InvalidConfig(_))));

        let mut config = ReportConfig::builtin("data");
        if let Some(portfolio) = config.portfolio.as_mut() {
            portfolio.date_column = "collected".to_string();
        }
        assert!(matches!(config.validate(), Err(ReportError::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_rejects_unknown_leaderboard_measure() {
        let mut config = ReportConfig::builtin("data");
        let section = config
            .sections
            .iter_mut()
            .find(|s| s.name == "zidisha_disbursements")
            .unwrap();
        if let Some(leaderboard) = section.leaderboard.as_mut() {
            leaderboard.measure = Some("principle".to_string());
        }
        assert!(matches!(config.validate(), Err(ReportError::InvalidConfig(_))));
    }

    #[test]
    fn test_branch_scope() {
        let scope = BranchScope::Exclude {
            branches: vec!["Advans Branch".to_string()],
        };
        assert!(scope.admits("Kiambu Branch"));
        assert!(!scope.admits("Advans Branch"));
        assert!(BranchScope::Only {
            branch: "Advans Branch".to_string()
        }
        .admits("Advans Branch"));
        assert!(BranchScope::All.admits("anything"));
    }

    #[test]
    fn test_source_format_from_extension() {
        assert_eq!(
            SourceFormat::from_path(Path::new("a/zidisha.XLSX")),
            Some(SourceFormat::Spreadsheet)
        );
        assert_eq!(
            SourceFormat::from_path(Path::new("repayments.csv")),
            Some(SourceFormat::Delimited)
        );
        assert_eq!(SourceFormat::from_path(Path::new("notes.pdf")), None);
    }
}
