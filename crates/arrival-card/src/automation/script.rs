//! Field plan and page scripts for the visible browser path.
//!
//! Fields are located by their visible label and filled with the same
//! strings a person would type or pick. Opaque taxonomy identifiers are never
//! used here: the page's own form maps labels to whatever the remote expects.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Serialize;

use crate::record::{CountryCode, TravelerSubmissionRecord};
use crate::renderer::js_literal;

/// How a control is operated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Date,
    Select,
    Radio,
}

impl FieldKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Date => "date",
            Self::Select => "select",
            Self::Radio => "radio",
        }
    }
}

/// One control to fill.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldFill {
    /// Stable id, usable as a label override key.
    pub key: &'static str,
    /// Visible label text on the page.
    pub label: String,
    pub kind: FieldKind,
    /// Strings to type, or to match against option text and value.
    pub candidates: Vec<String>,
}

const DEFAULT_LABELS: &[(&str, &str)] = &[
    ("passportNo", "Passport number"),
    ("documentType", "Document type"),
    ("issuingCountry", "Issuing country"),
    ("passportExpiry", "Passport expiry date"),
    ("surname", "Surname"),
    ("givenNames", "Given names"),
    ("gender", "Gender"),
    ("birthDate", "Date of birth"),
    ("nationality", "Nationality"),
    ("email", "Email"),
    ("phone", "Phone number"),
    ("travelMode", "Mode of travel"),
    ("transportNo", "Flight or vessel number"),
    ("departureCountry", "Departing from"),
    ("arrivalDate", "Arrival date"),
    ("travelPurpose", "Purpose of visit"),
    ("accommodationType", "Accommodation type"),
    ("accommodationAddress", "Accommodation address"),
    ("accommodationCity", "City"),
    ("accommodationPhone", "Accommodation phone"),
];

fn label_for(key: &'static str, overrides: &BTreeMap<String, String>) -> String {
    if let Some(label) = overrides.get(key) {
        return label.clone();
    }
    DEFAULT_LABELS
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, label)| (*label).to_string())
        .unwrap_or_else(|| key.to_string())
}

fn country_candidates(code: &CountryCode) -> Vec<String> {
    let mut out = Vec::new();
    if let Some(name) = code.english_name() {
        out.push(name.to_string());
    }
    out.push(code.as_str().to_string());
    out
}

fn pair(display: &str, code: &str) -> Vec<String> {
    vec![display.to_string(), code.to_string()]
}

/// Every control the form needs, in page order.
pub fn field_plan(
    record: &TravelerSubmissionRecord,
    overrides: &BTreeMap<String, String>,
) -> Vec<FieldFill> {
    let passport = &record.passport;
    let personal = &record.personal;
    let trip = &record.trip;
    let stay = &record.accommodation;
    let date = |d: chrono::NaiveDate| vec![d.format("%Y-%m-%d").to_string()];
    let text = |s: &str| vec![s.to_string()];

    let mut plan = vec![
        (FieldKind::Text, "passportNo", text(&passport.number)),
        (
            FieldKind::Select,
            "documentType",
            pair(passport.document_type.display_name(), passport.document_type.code()),
        ),
        (
            FieldKind::Select,
            "issuingCountry",
            country_candidates(&passport.issuing_country),
        ),
        (FieldKind::Date, "passportExpiry", date(passport.expiry_date)),
        (FieldKind::Text, "surname", text(&personal.surname)),
        (FieldKind::Text, "givenNames", text(&personal.given_names)),
        (
            FieldKind::Radio,
            "gender",
            pair(personal.gender.display_name(), personal.gender.code()),
        ),
        (FieldKind::Date, "birthDate", date(personal.date_of_birth)),
        (
            FieldKind::Select,
            "nationality",
            country_candidates(&personal.nationality),
        ),
        (FieldKind::Text, "email", text(&personal.email)),
        (FieldKind::Text, "phone", text(&personal.phone)),
        (
            FieldKind::Select,
            "travelMode",
            pair(trip.travel_mode.display_name(), trip.travel_mode.code()),
        ),
        (FieldKind::Text, "transportNo", text(&trip.transport_number)),
        (
            FieldKind::Select,
            "departureCountry",
            country_candidates(&trip.departure_country),
        ),
        (FieldKind::Date, "arrivalDate", date(trip.arrival_date)),
        (
            FieldKind::Select,
            "travelPurpose",
            pair(trip.purpose.display_name(), trip.purpose.code()),
        ),
        (
            FieldKind::Select,
            "accommodationType",
            pair(stay.kind.display_name(), stay.kind.code()),
        ),
        (FieldKind::Text, "accommodationAddress", text(&stay.address)),
        (FieldKind::Text, "accommodationCity", text(&stay.city)),
    ];
    if let Some(phone) = &stay.phone {
        plan.push((FieldKind::Text, "accommodationPhone", text(phone)));
    }

    plan.into_iter()
        .map(|(kind, key, candidates)| FieldFill {
            key,
            label: label_for(key, overrides),
            kind,
            candidates,
        })
        .collect()
}

/// Script that fills one control. Returns `ok`, `not_found`, or `no_match`.
pub fn fill_script(fill: &FieldFill) -> String {
    let label = js_literal(&fill.label);
    let kind = js_literal(fill.kind.as_str());
    let candidates = fill
        .candidates
        .iter()
        .map(|c| js_literal(c))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        r#"(function __arrivalFill() {{
  var label = {label};
  var kind = {kind};
  var candidates = [{candidates}];
  var norm = function(s) {{ return (s || '').replace(/[\s*:]+/g, ' ').trim().toLowerCase(); }};
  var want = norm(label);
  var wanted = candidates.map(norm);
  var fire = function(el) {{
    ['input', 'change', 'blur'].forEach(function(type) {{
      el.dispatchEvent(new Event(type, {{ bubbles: true }}));
    }});
  }};
  if (kind === 'radio') {{
    var groups = document.querySelectorAll('fieldset, [role="radiogroup"]');
    for (var g = 0; g < groups.length; g++) {{
      var legend = groups[g].querySelector('legend') || groups[g];
      var title = norm(legend.getAttribute('aria-label') || legend.textContent);
      if (title.indexOf(want) !== 0) {{ continue; }}
      var radios = groups[g].querySelectorAll('input[type="radio"]');
      for (var r = 0; r < radios.length; r++) {{
        var own = radios[r].labels && radios[r].labels[0] ? radios[r].labels[0].textContent : '';
        if (wanted.indexOf(norm(own)) >= 0 || wanted.indexOf(norm(radios[r].value)) >= 0) {{
          radios[r].focus();
          radios[r].click();
          fire(radios[r]);
          return 'ok';
        }}
      }}
      return 'no_match';
    }}
    return 'not_found';
  }}
  var control = null;
  var labels = document.querySelectorAll('label');
  for (var i = 0; i < labels.length && !control; i++) {{
    if (norm(labels[i].textContent).indexOf(want) !== 0) {{ continue; }}
    if (labels[i].htmlFor) {{ control = document.getElementById(labels[i].htmlFor); }}
    if (!control) {{ control = labels[i].querySelector('input, select, textarea'); }}
  }}
  if (!control) {{
    var all = document.querySelectorAll('input, select, textarea');
    for (var j = 0; j < all.length && !control; j++) {{
      if (norm(all[j].getAttribute('aria-label')) === want || norm(all[j].getAttribute('placeholder')) === want) {{
        control = all[j];
      }}
    }}
  }}
  if (!control) {{ return 'not_found'; }}
  control.focus();
  if (control.tagName === 'SELECT') {{
    for (var o = 0; o < control.options.length; o++) {{
      var opt = control.options[o];
      if (wanted.indexOf(norm(opt.textContent)) >= 0 || wanted.indexOf(norm(opt.value)) >= 0) {{
        control.value = opt.value;
        fire(control);
        return 'ok';
      }}
    }}
    return 'no_match';
  }}
  var proto = control.tagName === 'TEXTAREA' ? HTMLTextAreaElement.prototype : HTMLInputElement.prototype;
  var setter = Object.getOwnPropertyDescriptor(proto, 'value').set;
  setter.call(control, candidates[0] || '');
  fire(control);
  return 'ok';
}})()"#
    )
}

/// Script that clicks the first element matching `selector`.
pub fn click_script(selector: &str) -> String {
    let selector = js_literal(selector);
    format!(
        r#"(function __arrivalClick() {{
  var el = document.querySelector({selector});
  if (!el) {{ return 'not_found'; }}
  el.scrollIntoView({{ block: 'center' }});
  el.click();
  return 'ok';
}})()"#
    )
}

/// Script that scrapes the confirmation code and the proof image as a data URL.
pub fn result_script(code_selector: &str, proof_selector: &str) -> String {
    let code_selector = js_literal(code_selector);
    let proof_selector = js_literal(proof_selector);
    format!(
        r#"(function __arrivalResult() {{
  var codeEl = document.querySelector({code_selector});
  var code = codeEl ? (codeEl.getAttribute('data-confirmation-code') || codeEl.textContent || '').trim() : '';
  var proof = '';
  var el = document.querySelector({proof_selector});
  if (el && el.tagName === 'CANVAS') {{
    try {{ proof = el.toDataURL('image/png'); }} catch (e) {{}}
  }} else if (el && el.tagName === 'IMG') {{
    var src = el.getAttribute('src') || '';
    if (src.indexOf('data:') === 0) {{
      proof = src;
    }} else if (el.complete && el.naturalWidth > 0) {{
      try {{
        var c = document.createElement('canvas');
        c.width = el.naturalWidth;
        c.height = el.naturalHeight;
        c.getContext('2d').drawImage(el, 0, 0);
        proof = c.toDataURL('image/png');
      }} catch (e) {{}}
    }}
  }}
  return {{ code: code, proof: proof }};
}})()"#
    )
}

/// Decode a base64 `data:` URL into bytes.
pub fn decode_data_url(url: &str) -> Option<Vec<u8>> {
    let rest = url.strip_prefix("data:")?;
    let (meta, payload) = rest.split_once(',')?;
    if !meta.ends_with(";base64") {
        return None;
    }
    STANDARD.decode(payload.trim()).ok().filter(|b| !b.is_empty())
}
