//! Selectors and formats describing a court portal's cause-list pages.
//!
//! Defaults target the eCourts services cause-list page. Every selector can
//! be overridden from the `[portal]` config section when the markup moves.

use serde::{Deserialize, Serialize};

use crate::query::{CaseType, LocationLevel};
use crate::session::RowSpec;

/// Page layout of the cause-list search and results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalLayout {
    /// Cause-list search page.
    pub search_url: String,
    /// Close button of the announcement modal shown on load, if any.
    pub modal_close: Option<String>,
    /// State drop-down.
    pub state_select: Option<String>,
    /// District drop-down.
    pub district_select: Option<String>,
    /// Court complex drop-down.
    pub complex_select: Option<String>,
    /// Court drop-down.
    pub court_select: String,
    /// Date input.
    pub date_input: String,
    /// `chrono` format of the date input.
    pub date_format: String,
    /// Submit control for civil lists.
    pub civil_button: String,
    /// Submit control for criminal lists.
    pub criminal_button: String,
    /// Present once results have rendered.
    pub results_ready: String,
    /// Present when the search matched nothing.
    pub no_results: String,
    /// Validation message for rejected input.
    pub invalid_input: String,
    /// Present only when the portal demands a CAPTCHA answer. Must not match
    /// anything the search form always shows.
    pub captcha_challenge: Option<String>,
    /// One element per result row.
    pub result_row: String,
    /// Identifier cell within a row.
    pub row_key: String,
    /// Title cell within a row.
    pub row_title: String,
    /// Link or button opening the document within a row.
    pub row_link: String,
    /// Row attribute with the expected size in bytes.
    pub row_size_attribute: Option<String>,
    /// Enabled "next page" control.
    pub next_page: Option<String>,
    /// Present once the document viewer has rendered.
    pub viewer_ready: String,
    /// Download link inside the viewer, if the portal offers one.
    pub viewer_link: Option<String>,
    /// Control returning from the viewer to the results; history back otherwise.
    pub back_button: Option<String>,
}

impl Default for PortalLayout {
    fn default() -> Self {
        Self {
            search_url: "https://services.ecourts.gov.in/ecourtindia_v6/?p=cause_list/"
                .to_string(),
            modal_close: Some(
                "div.modal-header.text-center.align-items-start button.btn-close".to_string(),
            ),
            state_select: Some("#sess_state_code".to_string()),
            district_select: Some("#sess_dist_code".to_string()),
            complex_select: Some("#court_complex_code".to_string()),
            court_select: "#CL_court_no".to_string(),
            date_input: "#causelist_date".to_string(),
            date_format: "%d-%m-%Y".to_string(),
            civil_button: "button[onclick*='civ']".to_string(),
            criminal_button: "button[onclick*='cri']".to_string(),
            results_ready: "#res_cause_list a.someclass".to_string(),
            no_results: "#res_cause_list .no_record".to_string(),
            invalid_input: "#msg-danger .alert-danger-cust".to_string(),
            captcha_challenge: Some(
                "div.modal.show div.modal-header.text-center.align-items-start button.btn-close"
                    .to_string(),
            ),
            result_row: "#res_cause_list tbody tr".to_string(),
            row_key: "td:nth-child(1)".to_string(),
            row_title: "td:nth-child(2)".to_string(),
            row_link: "a.someclass".to_string(),
            row_size_attribute: None,
            next_page: None,
            viewer_ready: "span.fw-bold.text-uppercase.fs-5.me-2.text-danger".to_string(),
            viewer_link: None,
            back_button: Some("button#main_back_CauseList".to_string()),
        }
    }
}

impl PortalLayout {
    /// Row selectors for the paginator.
    #[must_use]
    pub fn row_spec(&self) -> RowSpec {
        RowSpec {
            row: self.result_row.clone(),
            key: self.row_key.clone(),
            title: self.row_title.clone(),
            link: self.row_link.clone(),
            size_attribute: self.row_size_attribute.clone(),
        }
    }

    /// Submit control for a case type.
    #[must_use]
    pub fn case_button(&self, case_type: CaseType) -> &str {
        match case_type {
            CaseType::Civil => &self.civil_button,
            CaseType::Criminal => &self.criminal_button,
        }
    }

    /// Drop-down for a location level, if the portal has one.
    #[must_use]
    pub fn location_select(&self, level: LocationLevel) -> Option<&str> {
        match level {
            LocationLevel::State => self.state_select.as_deref(),
            LocationLevel::District => self.district_select.as_deref(),
            LocationLevel::Complex => self.complex_select.as_deref(),
        }
    }

    /// Post-submission signals, in the order they are checked.
    ///
    /// The CAPTCHA marker comes last, so an outcome marker wins when both
    /// are on screen.
    #[must_use]
    pub fn submission_signals(&self) -> Vec<String> {
        let mut signals = vec![
            self.results_ready.clone(),
            self.no_results.clone(),
            self.invalid_input.clone(),
        ];
        if let Some(captcha) = &self.captcha_challenge {
            signals.push(captcha.clone());
        }
        signals
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout_targets_ecourts() {
        let layout = PortalLayout::default();
        assert!(layout.search_url.contains("services.ecourts.gov.in"));
        assert_eq!(layout.court_select, "#CL_court_no");
        assert_eq!(layout.date_format, "%d-%m-%Y");
    }

    #[test]
    fn test_submission_signals_order() {
        let layout = PortalLayout::default();
        let signals = layout.submission_signals();
        assert_eq!(signals.len(), 4);
        assert_eq!(signals[0], layout.results_ready);
        assert_eq!(signals[3], layout.captcha_challenge.clone().unwrap());

        let without_captcha = PortalLayout {
            captcha_challenge: None,
            ..PortalLayout::default()
        };
        assert_eq!(without_captcha.submission_signals().len(), 3);
    }

    #[test]
    fn test_default_challenge_marker_is_the_error_modal_not_the_form_image() {
        let layout = PortalLayout::default();
        let marker = layout.captcha_challenge.unwrap();
        assert!(!marker.contains("captcha_image"), "{marker}");
        assert!(marker.starts_with("div.modal.show"), "{marker}");
        assert_ne!(Some(marker), layout.modal_close);
    }

    #[test]
    fn test_partial_toml_keeps_other_defaults() {
        let layout: PortalLayout =
            toml::from_str("court_select = \"#court\"\nnext_page = \"a.next\"").unwrap();
        assert_eq!(layout.court_select, "#court");
        assert_eq!(layout.next_page.as_deref(), Some("a.next"));
        assert_eq!(layout.date_input, "#causelist_date");
    }

    #[test]
    fn test_case_button_and_location_select() {
        let layout = PortalLayout::default();
        assert_eq!(layout.case_button(CaseType::Criminal), layout.criminal_button);
        assert_eq!(
            layout.location_select(LocationLevel::District),
            Some("#sess_dist_code")
        );
    }
}
