//! Model-description document
//!
//! The document is composed from named, parameterized fragments. Output depends
//! only on the request, so identical inputs give identical files.

use crate::config::{ClockModel, JobConfig, SubstitutionModel, TreePrior};
use crate::error::{OrchestratorError, Result};
use phylogeo_geo::hierarchy::FIRST_LEVEL_CODE;
use phylogeo_geo::DisjointPartition;
use std::fmt::Write;
use std::path::Path;

/// One sampled sequence and its discrete location state
#[derive(Debug, Clone, PartialEq)]
pub struct TaxonState {
    pub id: String,
    pub state: String,
    pub latitude: f64,
    pub longitude: f64,
    pub date: Option<String>,
}

/// File names the inference engine writes, relative to its working directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggerFiles {
    pub trace: String,
    pub trees: String,
    pub rates: String,
}

impl Default for LoggerFiles {
    fn default() -> Self {
        Self {
            trace: "posterior.log".to_string(),
            trees: "posterior.trees".to_string(),
            rates: "rates.log".to_string(),
        }
    }
}

pub struct ModelRequest<'a> {
    pub alignment: &'a Path,
    pub taxa: &'a [TaxonState],
    pub partition: &'a DisjointPartition,
    pub config: &'a JobConfig,
    pub loggers: &'a LoggerFiles,
}

/// Builds the inference engine's input document
pub trait ModelBuilder: Send + Sync {
    fn build(&self, request: &ModelRequest<'_>) -> Result<String>;
}

/// Named block of the document
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub name: &'static str,
    pub body: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FragmentModelBuilder;

impl FragmentModelBuilder {
    pub fn fragments(&self, request: &ModelRequest<'_>) -> Result<Vec<Fragment>> {
        let mut fragments = vec![
            taxa_block(request),
            alignment_block(request),
            state_type_block(request.partition),
            substitution_block(request.config),
            clock_block(request.config.model.clock_model),
            tree_prior_block(request.config.model.tree_prior),
        ];
        if request.config.use_glm {
            fragments.push(predictor_block(request)?);
        }
        fragments.push(operator_block(request.config));
        fragments.push(logger_block(request));
        Ok(fragments)
    }
}

impl ModelBuilder for FragmentModelBuilder {
    fn build(&self, request: &ModelRequest<'_>) -> Result<String> {
        let mut doc = String::from("<?xml version=\"1.0\" standalone=\"yes\"?>\n<beast>\n");
        for fragment in self.fragments(request)? {
            let _ = writeln!(doc, "\t<!-- {} -->", fragment.name);
            doc.push_str(&fragment.body);
        }
        doc.push_str("</beast>\n");
        Ok(doc)
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn taxa_block(request: &ModelRequest<'_>) -> Fragment {
    let mut body = String::from("\t<taxa id=\"taxa\">\n");
    for taxon in request.taxa {
        let _ = writeln!(body, "\t\t<taxon id=\"{}\">", escape(&taxon.id));
        if let Some(date) = &taxon.date {
            let _ = writeln!(
                body,
                "\t\t\t<date value=\"{}\" direction=\"forwards\" units=\"years\"/>",
                escape(date)
            );
        }
        let _ = writeln!(
            body,
            "\t\t\t<attr name=\"location\">{}</attr>",
            escape(&taxon.state)
        );
        if request.config.geo_uncertainty {
            let _ = writeln!(
                body,
                "\t\t\t<attr name=\"coordinates\">{:.4} {:.4}</attr>",
                taxon.latitude, taxon.longitude
            );
        }
        body.push_str("\t\t</taxon>\n");
    }
    body.push_str("\t</taxa>\n");
    Fragment { name: "taxa", body }
}

fn alignment_block(request: &ModelRequest<'_>) -> Fragment {
    let file = request
        .alignment
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut body = format!(
        "\t<alignment id=\"alignment\" dataType=\"nucleotide\" file=\"{}\">\n",
        escape(&file)
    );
    for taxon in request.taxa {
        let _ = writeln!(body, "\t\t<sequence taxon=\"{}\"/>", escape(&taxon.id));
    }
    body.push_str("\t</alignment>\n");
    Fragment {
        name: "alignment",
        body,
    }
}

fn state_type_block(partition: &DisjointPartition) -> Fragment {
    let mut body = String::from("\t<generalDataType id=\"location.dataType\">\n");
    for member in partition.iter() {
        let _ = writeln!(body, "\t\t<state code=\"{}\"/>", escape(&member.name));
    }
    body.push_str("\t</generalDataType>\n");
    let _ = writeln!(
        body,
        "\t<attributePatterns id=\"location.pattern\" attribute=\"location\" dataType=\"location.dataType\" states=\"{}\"/>",
        partition.len()
    );
    Fragment {
        name: "discrete states",
        body,
    }
}

fn substitution_block(config: &JobConfig) -> Fragment {
    let model = &config.model;
    let name = match model.substitution_model {
        SubstitutionModel::Hky => "HKY",
        SubstitutionModel::Gtr => "GTR",
        SubstitutionModel::Tn93 => "TN93",
    };
    let mut body = format!("\t<substitutionModel id=\"{}\" type=\"{}\">\n", name.to_lowercase(), name);
    if model.gamma {
        body.push_str("\t\t<gammaShape categories=\"4\" initial=\"0.5\"/>\n");
    }
    if model.invariant_sites {
        body.push_str("\t\t<proportionInvariant initial=\"0.5\"/>\n");
    }
    body.push_str("\t</substitutionModel>\n");
    // location exchange rates start at 1.0; the degenerate check relies on it
    body.push_str(
        "\t<locationSubstitutionModel id=\"location.model\" dataType=\"location.dataType\" symmetric=\"true\" rates=\"location.rates\" initial=\"1.0\"/>\n",
    );
    Fragment {
        name: "substitution",
        body,
    }
}

fn clock_block(clock: ClockModel) -> Fragment {
    let body = match clock {
        ClockModel::Strict => "\t<strictClockBranchRates id=\"branchRates\" rate=\"1.0\"/>\n".to_string(),
        ClockModel::UncorrelatedLognormal => {
            "\t<discretizedBranchRates id=\"branchRates\" distribution=\"lognormal\" meanInRealSpace=\"true\"/>\n"
                .to_string()
        }
        ClockModel::RandomLocal => {
            "\t<randomLocalClockModel id=\"branchRates\" ratesAreMultipliers=\"false\"/>\n".to_string()
        }
    };
    Fragment { name: "clock", body }
}

fn tree_prior_block(prior: TreePrior) -> Fragment {
    let body = match prior {
        TreePrior::Constant => "\t<constantSize id=\"treePrior\" units=\"years\"/>\n".to_string(),
        TreePrior::Exponential => "\t<exponentialGrowth id=\"treePrior\" units=\"years\"/>\n".to_string(),
        TreePrior::Skygrid => "\t<gmrfSkyGridLikelihood id=\"treePrior\" gridPoints=\"50\"/>\n".to_string(),
    };
    Fragment {
        name: "tree prior",
        body,
    }
}

fn predictor_block(request: &ModelRequest<'_>) -> Result<Fragment> {
    let mut body = String::new();
    match &request.config.custom_predictors {
        None => {
            let _ = writeln!(
                body,
                "\t<glmPredictors id=\"location.glm\" source=\"default\" level=\"{}\">",
                FIRST_LEVEL_CODE
            );
            for member in request.partition.iter() {
                let _ = writeln!(
                    body,
                    "\t\t<state code=\"{}\" geonameId=\"{}\"/>",
                    escape(&member.name),
                    member.geoname_id
                );
            }
        }
        Some(table) => {
            body.push_str("\t<glmPredictors id=\"location.glm\" source=\"custom\">\n");
            let mut columns = Vec::with_capacity(request.partition.len());
            for member in request.partition.iter() {
                let idx = table.location_index(&member.name).ok_or_else(|| {
                    OrchestratorError::pipeline(
                        format!(
                            "The predictor table has no values for location '{}'.",
                            member.name
                        ),
                        format!(
                            "custom predictors missing partition member {} ({})",
                            member.name, member.geoname_id
                        ),
                    )
                })?;
                columns.push(idx);
            }
            for (name, row) in table.names.iter().zip(&table.values) {
                let values: Vec<String> = columns.iter().map(|i| row[*i].to_string()).collect();
                let _ = writeln!(
                    body,
                    "\t\t<predictor name=\"{}\" values=\"{}\"/>",
                    escape(name),
                    values.join(" ")
                );
            }
        }
    }
    body.push_str("\t</glmPredictors>\n");
    Ok(Fragment {
        name: "glm predictors",
        body,
    })
}

fn operator_block(config: &JobConfig) -> Fragment {
    let mut body = String::from("\t<operators id=\"operators\">\n");
    body.push_str("\t\t<subtreeSlide weight=\"15\" tree=\"treeModel\"/>\n");
    body.push_str("\t\t<narrowExchange weight=\"15\" tree=\"treeModel\"/>\n");
    body.push_str("\t\t<wideExchange weight=\"3\" tree=\"treeModel\"/>\n");
    body.push_str("\t\t<scaleOperator weight=\"3\" parameter=\"treeModel.rootHeight\"/>\n");
    if config.model.gamma {
        body.push_str("\t\t<scaleOperator weight=\"1\" parameter=\"alpha\"/>\n");
    }
    if config.use_glm {
        body.push_str("\t\t<bitFlipOperator weight=\"3\" parameter=\"location.glm.indicators\"/>\n");
        body.push_str("\t\t<randomWalkOperator weight=\"3\" parameter=\"location.glm.coefficients\"/>\n");
    } else {
        body.push_str("\t\t<scaleOperator weight=\"1\" parameter=\"location.rates\"/>\n");
        body.push_str("\t\t<bitFlipOperator weight=\"1\" parameter=\"location.indicators\"/>\n");
    }
    body.push_str("\t</operators>\n");
    Fragment {
        name: "operators",
        body,
    }
}

fn logger_block(request: &ModelRequest<'_>) -> Fragment {
    let model = &request.config.model;
    let every = model.subsample_rate;
    let loggers = request.loggers;
    let mut body = format!(
        "\t<mcmc id=\"mcmc\" chainLength=\"{}\" autoOptimize=\"true\">\n",
        model.chain_length
    );
    let _ = writeln!(body, "\t\t<log id=\"screenLog\" logEvery=\"{}\"/>", every);
    let _ = writeln!(
        body,
        "\t\t<log id=\"fileLog\" logEvery=\"{}\" fileName=\"{}\"/>",
        every,
        escape(&loggers.trace)
    );
    let _ = writeln!(
        body,
        "\t\t<log id=\"rateMatrixLog\" logEvery=\"{}\" fileName=\"{}\" parameter=\"location.rates\"/>",
        every,
        escape(&loggers.rates)
    );
    let _ = writeln!(
        body,
        "\t\t<logTree id=\"treeFileLog\" logEvery=\"{}\" fileName=\"{}\" trait=\"location\"/>",
        every,
        escape(&loggers.trees)
    );
    body.push_str("\t</mcmc>\n");
    Fragment {
        name: "loggers",
        body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PredictorTable;
    use phylogeo_geo::{DisjointPolicy, GeoLocation, GeonameDisjointer, LocatedRecord};
    use std::path::PathBuf;

    fn partition() -> DisjointPartition {
        let records = vec![
            LocatedRecord::new(
                "a",
                Some(GeoLocation::new(4361885, "Maryland", "ADM1")),
                Some([6252001].into_iter().collect()),
            ),
            LocatedRecord::new(
                "b",
                Some(GeoLocation::new(5549030, "Utah", "ADM1")),
                Some([6252001].into_iter().collect()),
            ),
        ];
        GeonameDisjointer::new(DisjointPolicy::default())
            .resolve(&records)
            .unwrap()
            .partition
    }

    fn taxa() -> Vec<TaxonState> {
        vec![
            TaxonState {
                id: "a".into(),
                state: "Maryland".into(),
                latitude: 39.0,
                longitude: -76.7,
                date: Some("2014.5".into()),
            },
            TaxonState {
                id: "b".into(),
                state: "Utah".into(),
                latitude: 39.3,
                longitude: -111.7,
                date: None,
            },
        ]
    }

    fn build(config: &JobConfig) -> Result<String> {
        let partition = partition();
        let taxa = taxa();
        let alignment = PathBuf::from("/w/aligned.fasta");
        let loggers = LoggerFiles::default();
        FragmentModelBuilder.build(&ModelRequest {
            alignment: &alignment,
            taxa: &taxa,
            partition: &partition,
            config,
            loggers: &loggers,
        })
    }

    #[test]
    fn test_document_is_deterministic() {
        let config = JobConfig::default();
        assert_eq!(build(&config).unwrap(), build(&config).unwrap());
    }

    #[test]
    fn test_document_contains_states_and_loggers() {
        let doc = build(&JobConfig::default()).unwrap();
        assert!(doc.contains("<state code=\"Maryland\"/>"));
        assert!(doc.contains("<state code=\"Utah\"/>"));
        assert!(doc.contains("file=\"aligned.fasta\""));
        assert!(doc.contains("fileName=\"rates.log\""));
        assert!(doc.contains("chainLength=\"10000000\""));
        assert!(!doc.contains("glmPredictors"));
    }

    #[test]
    fn test_fragment_order() {
        let config = JobConfig {
            use_glm: true,
            ..Default::default()
        };
        let partition = partition();
        let taxa = taxa();
        let alignment = PathBuf::from("aligned.fasta");
        let loggers = LoggerFiles::default();
        let names: Vec<&str> = FragmentModelBuilder
            .fragments(&ModelRequest {
                alignment: &alignment,
                taxa: &taxa,
                partition: &partition,
                config: &config,
                loggers: &loggers,
            })
            .unwrap()
            .iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(
            names,
            vec![
                "taxa",
                "alignment",
                "discrete states",
                "substitution",
                "clock",
                "tree prior",
                "glm predictors",
                "operators",
                "loggers"
            ]
        );
    }

    #[test]
    fn test_custom_predictors_follow_partition_order() {
        let config = JobConfig {
            use_glm: true,
            custom_predictors: Some(PredictorTable {
                names: vec!["population".into()],
                locations: vec!["utah".into(), "maryland".into()],
                values: vec![vec![3.2, 6.1]],
            }),
            ..Default::default()
        };
        let doc = build(&config).unwrap();
        assert!(doc.contains("<predictor name=\"population\" values=\"6.1 3.2\"/>"));
    }

    #[test]
    fn test_custom_predictors_missing_location() {
        let config = JobConfig {
            use_glm: true,
            custom_predictors: Some(PredictorTable {
                names: vec!["population".into()],
                locations: vec!["Maryland".into()],
                values: vec![vec![6.1]],
            }),
            ..Default::default()
        };
        let err = build(&config).unwrap_err();
        assert_eq!(
            err.user_message(),
            "The predictor table has no values for location 'Utah'."
        );
    }

    #[test]
    fn test_geo_uncertainty_adds_coordinates() {
        let config = JobConfig {
            geo_uncertainty: true,
            ..Default::default()
        };
        let doc = build(&config).unwrap();
        assert!(doc.contains("<attr name=\"coordinates\">39.0000 -76.7000</attr>"));
    }
}
