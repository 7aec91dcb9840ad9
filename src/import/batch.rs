use std::time::Instant;

use tracing::{error, info};

use citywiki::config::CityConfig;
use citywiki::pipeline::{ImportSummary, Importer};
use citywiki::wikivoyage::MarkupSource;

/// Import cities one after another; a failed city does not stop the batch
pub async fn run_batch<S: MarkupSource + 'static>(
    importer: &Importer<S>,
    cities: &[CityConfig],
) -> Vec<ImportSummary> {
    info!("Starting import for {} cities", cities.len());

    let mut summaries = Vec::with_capacity(cities.len());
    for city in cities {
        let start = Instant::now();
        let summary = importer.import_tree(&city.name, city.max_depth).await;

        if summary.root.is_success() {
            info!(
                "{} complete in {:.1}s: {} POIs in {} districts, {} failures",
                city.name,
                start.elapsed().as_secs_f64(),
                summary.total_pois,
                summary.districts.len(),
                summary.failures
            );
        } else {
            error!("Import of {} failed, see validations", city.name);
        }
        summaries.push(summary);
    }

    summaries
}
