// powerplant_api - Operations dashboard backend for power-plant efficiency metrics
//
// Copyright 2022 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use crate::client::Endpoint;
use crate::document::Format;
use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::Registry;

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
enum Outcome {
    Success,
    Failure,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct RequestLabels {
    endpoint: Endpoint,
    outcome: Outcome,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct DocumentLabels {
    format: Format,
}

/// Holder for metrics about calls made to the historian and documents rendered.
///
/// All metrics are created and registered upon call to `ServiceMetrics::new()` and
/// share the "powerplant_" prefix. Clones share the same underlying counters.
#[derive(Clone, Debug)]
pub struct ServiceMetrics {
    historian_requests: Family<RequestLabels, Counter>,
    historian_logins: Counter,
    documents: Family<DocumentLabels, Counter>,
}

impl ServiceMetrics {
    /// Create a new `ServiceMetrics` and register each metric with the provided `Registry`.
    pub fn new(reg: &mut Registry) -> Self {
        let historian_requests = Family::<RequestLabels, Counter>::default();
        let historian_logins = Counter::default();
        let documents = Family::<DocumentLabels, Counter>::default();

        let sub = reg.sub_registry_with_prefix("powerplant");
        sub.register(
            "historian_requests",
            "Requests made to the historian API by endpoint and outcome",
            historian_requests.clone(),
        );
        sub.register(
            "historian_logins",
            "Successful logins to the historian API",
            historian_logins.clone(),
        );
        sub.register(
            "documents_rendered",
            "Documents rendered by output format",
            documents.clone(),
        );

        Self {
            historian_requests,
            historian_logins,
            documents,
        }
    }

    pub fn historian_request(&self, endpoint: Endpoint, success: bool) {
        let outcome = if success { Outcome::Success } else { Outcome::Failure };
        self.historian_requests
            .get_or_create(&RequestLabels { endpoint, outcome })
            .inc();
    }

    pub fn login(&self) {
        self.historian_logins.inc();
    }

    pub fn document_rendered(&self, format: Format) {
        self.documents.get_or_create(&DocumentLabels { format }).inc();
    }

    /// Number of logins recorded so far.
    pub fn logins(&self) -> u64 {
        self.historian_logins.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus_client::encoding::text::encode;

    #[test]
    fn test_metrics_are_encoded() {
        let mut reg = Registry::default();
        let metrics = ServiceMetrics::new(&mut reg);
        metrics.historian_request(Endpoint::Realtime, true);
        metrics.historian_request(Endpoint::Realtime, false);
        metrics.login();
        metrics.document_rendered(Format::Pdf);

        let mut buf = String::new();
        encode(&mut buf, &reg).unwrap();

        assert!(buf.contains("powerplant_historian_requests_total{endpoint=\"Realtime\",outcome=\"Success\"} 1"));
        assert!(buf.contains("powerplant_historian_requests_total{endpoint=\"Realtime\",outcome=\"Failure\"} 1"));
        assert!(buf.contains("powerplant_historian_logins_total 1"));
        assert!(buf.contains("powerplant_documents_rendered_total{format=\"Pdf\"} 1"));
        assert_eq!(1, metrics.logins());
    }
}
