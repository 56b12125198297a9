use std::io::{self, Write};
use std::path::PathBuf;

use crate::config::RuntimeConfig;
use crate::dataset;
use crate::domain::{Job, OutputFormat};
use crate::enrich;
use crate::error::GeodataError;
use crate::export;
use crate::fetch::SourceClient;
use crate::lookups::LookupRegistry;
use crate::manifest::{self, UploadRecord};
use crate::publish::ObjectStorageClient;
use crate::store::Store;
use crate::tiles::TilingClient;
use crate::archive;

pub trait ProgressSink {
    /// Per-job status lines, always shown.
    fn event(&self, message: &str);

    /// Extra detail shown only in verbose runs.
    fn detail(&self, _message: &str) {}

    /// Incremental byte progress for one transfer.
    fn bytes(&self, _label: &str, _seen: u64, _total: Option<u64>) {}

    /// Called once after the final `bytes` update of a transfer.
    fn bytes_done(&self) {}
}

pub struct StdoutReporter {
    verbose: bool,
}

impl StdoutReporter {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl ProgressSink for StdoutReporter {
    fn event(&self, message: &str) {
        println!("{message}");
    }

    fn detail(&self, message: &str) {
        if self.verbose {
            println!("{message}");
        }
    }

    fn bytes(&self, label: &str, seen: u64, total: Option<u64>) {
        if !self.verbose {
            return;
        }
        match total {
            Some(total) if total > 0 => {
                let percentage = (seen as f64 / total as f64) * 100.0;
                print!(
                    "\r - {label}  {:.2} / {:.2} MB  ({percentage:.2}%)",
                    seen as f64 / (1024.0 * 1024.0),
                    total as f64 / (1024.0 * 1024.0)
                );
            }
            _ => print!("\r - {label}  {:.2} MB", seen as f64 / (1024.0 * 1024.0)),
        }
        let _ = io::stdout().flush();
    }

    fn bytes_done(&self) {
        if self.verbose {
            println!();
        }
    }
}

pub struct NoopSink;

impl ProgressSink for NoopSink {
    fn event(&self, _message: &str) {}
}

/// A combination requested on the command line that the lookup registry has
/// no source information for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidCombination {
    pub year: String,
    pub scale: String,
    pub geography: String,
}

#[derive(Debug, Clone)]
pub struct JobSelection {
    pub jobs: Vec<Job>,
    pub invalid: Vec<InvalidCombination>,
}

/// Expand the requested axes into the valid (year, scale, geography)
/// combinations known to the registry, years outermost. An axis left empty
/// defaults to every value the registry knows. Combinations without source
/// information are reported, never fatal.
pub fn select_jobs(
    registry: &LookupRegistry,
    years: &[String],
    scales: &[String],
    geographies: &[String],
) -> JobSelection {
    let years = if years.is_empty() {
        registry.years()
    } else {
        years.to_vec()
    };
    let scales = if scales.is_empty() {
        registry.scales()
    } else {
        scales.to_vec()
    };
    let geographies = if geographies.is_empty() {
        registry.geographies()
    } else {
        geographies.to_vec()
    };

    let mut jobs = Vec::new();
    let mut invalid = Vec::new();
    for year in &years {
        for scale in &scales {
            for geography in &geographies {
                if registry.source(year, scale, geography).is_some() {
                    jobs.push(Job::new(year, geography, scale));
                } else {
                    invalid.push(InvalidCombination {
                        year: year.clone(),
                        scale: scale.clone(),
                        geography: geography.clone(),
                    });
                }
            }
        }
    }
    JobSelection { jobs, invalid }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub formats: Vec<OutputFormat>,
    pub no_cache: bool,
    pub upload: bool,
    pub verbose: bool,
}

#[derive(Debug)]
pub struct BatchSummary {
    pub succeeded: Vec<Job>,
    pub failed: Vec<(Job, GeodataError)>,
}

pub struct App<C: SourceClient, T: TilingClient, O: ObjectStorageClient> {
    config: RuntimeConfig,
    registry: LookupRegistry,
    store: Store,
    source: C,
    tiler: Option<T>,
    storage: Option<O>,
}

impl<C: SourceClient, T: TilingClient, O: ObjectStorageClient> App<C, T, O> {
    pub fn new(
        config: RuntimeConfig,
        registry: LookupRegistry,
        store: Store,
        source: C,
        tiler: Option<T>,
        storage: Option<O>,
    ) -> Self {
        Self {
            config,
            registry,
            store,
            source,
            tiler,
            storage,
        }
    }

    /// Run every job in order; one job's failure is reported and the batch
    /// continues with the next job.
    pub fn run_batch(
        &self,
        jobs: &[Job],
        options: &RunOptions,
        sink: &dyn ProgressSink,
    ) -> Result<BatchSummary, GeodataError> {
        if options.upload && self.storage.is_none() {
            return Err(GeodataError::ConfigurationMissing(
                "upload requested but object storage is not configured".to_string(),
            ));
        }

        let mut summary = BatchSummary {
            succeeded: Vec::new(),
            failed: Vec::new(),
        };

        for job in jobs {
            match self.run_job(job, options, sink) {
                Ok(artifacts) => {
                    if options.upload {
                        match self.publish(job, &artifacts, options, sink) {
                            Ok(()) => summary.succeeded.push(job.clone()),
                            Err(err) => {
                                sink.event(&format!("✘ {job}: {err}"));
                                summary.failed.push((job.clone(), err));
                            }
                        }
                    } else {
                        summary.succeeded.push(job.clone());
                    }
                }
                Err(err) => {
                    sink.event(&format!("✘ {job}: {err}"));
                    summary.failed.push((job.clone(), err));
                }
            }
        }
        Ok(summary)
    }

    /// One job end to end: download, expand, merge, enrich, export.
    /// Returns the exported artifact paths.
    pub fn run_job(
        &self,
        job: &Job,
        options: &RunOptions,
        sink: &dyn ProgressSink,
    ) -> Result<Vec<PathBuf>, GeodataError> {
        sink.event(&format!("\nPROCESSING: {job}"));

        let entry = self
            .registry
            .source(job.year(), job.scale(), job.geography())
            .ok_or_else(|| GeodataError::InvalidJobCombination {
                year: job.year().to_string(),
                scale: job.scale().to_string(),
                geography: job.geography().to_string(),
            })?;
        let summary_level = self
            .registry
            .summary_level(job.geography())
            .ok_or_else(|| {
                GeodataError::ConfigurationMissing(format!(
                    "no summary level for geography {}",
                    job.geography()
                ))
            })?;

        sink.detail("downloading files...");
        let raw_dir = self.store.raw_dir(job);
        let mut archives = Vec::new();
        for file_path in &entry.file_list {
            let url = format!("{}{}", self.config.mirror_url, file_path);
            sink.detail(&format!(" -{url}"));
            let filename = file_path
                .rsplit('/')
                .next()
                .ok_or_else(|| GeodataError::Filesystem(format!("bad file path {file_path}")))?;
            let destination = raw_dir.join(filename);
            archives.push(self.source.download(
                &url,
                destination.as_std_path(),
                options.no_cache,
                sink,
            )?);
        }

        sink.detail("unzipping files...");
        let mut shp_paths = Vec::new();
        for path in &archives {
            shp_paths.extend(archive::expand_archive(path)?);
        }

        sink.detail("merging into one dataset...");
        let mut collection = dataset::merge(&shp_paths)?;

        sink.detail("adding HEROP_ID, BBOX, LABEL...");
        enrich::enrich(&mut collection, entry, summary_level, &self.registry)?;

        let mut artifacts = Vec::new();
        let mut geojson_path: Option<PathBuf> = None;

        if options.formats.contains(&OutputFormat::Shp) {
            sink.event("generating shapefile...");
            artifacts.push(export::export_shapefile(&self.store, job, &collection)?);
        }
        if options.formats.contains(&OutputFormat::Geojson) {
            sink.event("generating geojson...");
            let path = export::export_geojson(&self.store, job, &collection, true)?;
            artifacts.push(path.clone());
            geojson_path = Some(path);
        }
        if options.formats.contains(&OutputFormat::Pmtiles) {
            sink.event("generating pmtiles...");
            let tiler = self.tiler.as_ref().ok_or_else(|| {
                GeodataError::ConfigurationMissing(
                    "TIPPECANOE_PATH is not set, but is needed to support PMTiles output"
                        .to_string(),
                )
            })?;
            // tippecanoe consumes geojson; reuse this run's file if present,
            // otherwise produce it now. Either way it is a publishable
            // artifact in its own right.
            let geojson = match geojson_path {
                Some(path) => path,
                None => {
                    let path = export::export_geojson(&self.store, job, &collection, true)?;
                    artifacts.push(path.clone());
                    path
                }
            };
            artifacts.push(export::export_pmtiles(&self.store, job, &geojson, tiler)?);
        }

        Ok(artifacts)
    }

    fn publish(
        &self,
        job: &Job,
        artifacts: &[PathBuf],
        options: &RunOptions,
        sink: &dyn ProgressSink,
    ) -> Result<(), GeodataError> {
        let storage = self.storage.as_ref().ok_or_else(|| {
            GeodataError::ConfigurationMissing("object storage is not configured".to_string())
        })?;

        sink.event(&format!("uploading {} files to S3...", artifacts.len()));
        for path in artifacts {
            let url = storage.upload(path, options.verbose)?;
            sink.detail(&format!("  {url}"));

            // Alternate buckets/prefixes never touch the shared manifest.
            let canonical = self
                .config
                .s3
                .as_ref()
                .map(|s3| s3.is_canonical_destination())
                .unwrap_or(false);
            if canonical {
                manifest::record_upload(
                    &self.config.manifest_path(),
                    UploadRecord::new(job, &url),
                )?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use crate::lookups::SourceEntry;

    use super::*;

    fn registry() -> LookupRegistry {
        let entry = SourceEntry {
            file_list: vec!["/tiger/GENZ2020/shp/cb_2020_us_county_500k.zip".to_string()],
            herop_id_suffixes: vec!["GEOID".to_string()],
            name_field: "NAME".to_string(),
        };
        let mut geographies = BTreeMap::new();
        geographies.insert("county".to_string(), entry);
        let mut scales = BTreeMap::new();
        scales.insert("tract".to_string(), geographies);
        let mut sources = BTreeMap::new();
        sources.insert("2020".to_string(), scales);
        LookupRegistry::from_parts(sources, BTreeMap::new(), BTreeMap::new())
    }

    #[test]
    fn selector_reports_invalid_without_aborting() {
        let registry = registry();
        let selection = select_jobs(
            &registry,
            &["2020".to_string()],
            &["tract".to_string(), "block".to_string()],
            &["county".to_string()],
        );

        assert_eq!(selection.jobs, vec![Job::new("2020", "county", "tract")]);
        assert_eq!(
            selection.invalid,
            vec![InvalidCombination {
                year: "2020".to_string(),
                scale: "block".to_string(),
                geography: "county".to_string(),
            }]
        );
    }

    #[test]
    fn selector_defaults_empty_axes_to_registry() {
        let registry = registry();
        let selection = select_jobs(&registry, &[], &[], &[]);
        assert_eq!(selection.jobs.len(), 1);
        assert!(selection.invalid.is_empty());
    }

    #[test]
    fn selector_iterates_years_outermost() {
        let mut sources = BTreeMap::new();
        for year in ["2018", "2020"] {
            let entry = SourceEntry {
                file_list: Vec::new(),
                herop_id_suffixes: Vec::new(),
                name_field: "NAME".to_string(),
            };
            let mut geographies = BTreeMap::new();
            geographies.insert("county".to_string(), entry.clone());
            geographies.insert("state".to_string(), entry);
            let mut scales = BTreeMap::new();
            scales.insert("500k".to_string(), geographies);
            sources.insert(year.to_string(), scales);
        }
        let registry = LookupRegistry::from_parts(sources, BTreeMap::new(), BTreeMap::new());

        let selection = select_jobs(&registry, &[], &[], &[]);
        let order: Vec<String> = selection.jobs.iter().map(Job::name_string).collect();
        assert_eq!(
            order,
            vec![
                "county-2018-500k",
                "state-2018-500k",
                "county-2020-500k",
                "state-2020-500k",
            ]
        );
    }
}
