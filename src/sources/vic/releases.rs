//! Victorian media releases: the DHHS media hub and the older health.vic
//! media centre. Both are prose; figures come from [`parse_fulltext`].

use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::warn;
use url::Url;

use crate::error::PipelineError;
use crate::extract::patterns::{capture_num, compile_all, first_captures};
use crate::extract::parse_full_date;
use crate::sources::absolute_url;

pub const MEDIA_HUB_BASE: &str = "https://www.dhhs.vic.gov.au";
pub const HISTORICAL_LISTING_URL: &str = "https://www2.health.vic.gov.au/about/media-centre/mediareleases/?q=&ps=100&pn=1&s=relevance&i=&f=&n=&e=&a=&ac=&df=&dt=&l=&lq=";

/// Releases missing from the media hub listing.
pub const EXTRA_MEDIA_URIS: [&str; 2] = [
    "/coronavirus-update-victoria-24-april-2020",
    "/coronavirus-update-victoria-21-may-2020",
];

lazy_static! {
    static ref CONFIRMED: Vec<Regex> = compile_all(&[
        r"(?s)^.*total number of (?:coronavirus \(COVID-19\) )?cases (in Victoria|increased|now) (is|to|at) (?P<confirmed>[\d,]+)",
        r"(?s)^.*Of the total (?P<confirmed>[\d,]+) cases",
    ]);
    static ref TESTED: Regex = Regex::new(
        r"(?s)^.* (?P<tested>[\d,]+) (Victorians have been tested to date|(swabs|tests|test results) have been (conducted|processed|completed|undertaken|taken|received))"
    )
    .expect("TESTED to compile");
    static ref DEATHS: Vec<Regex> = compile_all(&[
        r"(?s)^.*Victoria has(?: now)? recorded(?: its first)? (?P<deaths>\w+) deaths related to (?:coronavirus|COVID-19)",
        r"(?s)^.*To date, (?P<deaths>\w+) people have died from coronavirus in Victoria",
        r"(?s)^.*taking the number of people who have died in Victoria from coronavirus to (?P<deaths>\w+)",
    ]);
    static ref RECOVERED: Regex =
        Regex::new(r"(?s)^.* (?P<recovered>[\d,]+) people have recovered").expect("RECOVERED to compile");
    static ref HOSPITALIZED: Regex =
        Regex::new(r"(?s)^.*Currently (?P<hospital>\w+) people are (recovering )?in hospital")
            .expect("HOSPITALIZED to compile");
    static ref ICU: Regex =
        Regex::new(r"(?s)^.*including (?P<icu>\w+) patients in intensive care").expect("ICU to compile");

    static ref MEDIA_HUB_ITEM: Selector = selector("div.page-content li");
    static ref LINK: Selector = selector("a");
    static ref LAYOUT_REGION: Selector = selector("div.layout__region");
    static ref FIRST_LINE: Selector = selector("div.first-line");
    static ref H1: Selector = selector("h1");
    static ref PAGE_CONTENT: Selector = selector("div.page-content");
    static ref HISTORICAL_ITEM: Selector = selector("ol.listing li");
    static ref H3: Selector = selector("h3");
    static ref PAGE_DATE: Selector = selector("div.page-date");
    static ref MAIN: Selector = selector("div#main");
}

fn selector(css: &str) -> Selector {
    Selector::parse(css).unwrap_or_else(|e| panic!("invalid selector {css:?}: {e:?}"))
}

/// Figures a release states in prose.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReleaseFigures {
    pub confirmed: Option<i64>,
    pub tested: Option<i64>,
    pub deaths: Option<i64>,
    pub recovered: Option<i64>,
    pub hospitalized: Option<i64>,
    pub icu: Option<i64>,
}

pub fn parse_fulltext(body: &str) -> ReleaseFigures {
    // ---
    let body = body.replace('\u{a0}', " ");
    let single = |pattern: &Regex, group: &str| pattern.captures(&body).and_then(|c| capture_num(&c, group));

    ReleaseFigures {
        confirmed: first_captures(&CONFIRMED, &body).and_then(|c| capture_num(&c, "confirmed")),
        tested: single(&TESTED, "tested"),
        deaths: first_captures(&DEATHS, &body).and_then(|c| capture_num(&c, "deaths")),
        recovered: single(&RECOVERED, "recovered"),
        hospitalized: single(&HOSPITALIZED, "hospital"),
        icu: single(&ICU, "icu"),
    }
}

/// Site-relative URIs of DHHS releases on the media hub page.
pub fn media_hub_uris(page: &str) -> Vec<String> {
    // ---
    let html = Html::parse_document(page);
    html.select(&MEDIA_HUB_ITEM)
        .filter(|li| {
            let text: String = li.text().collect();
            text.contains("Department of Health and Human Services media release")
                && !text.contains("repatriation flights")
        })
        .filter_map(|li| li.select(&LINK).next()?.value().attr("href"))
        .map(|href| href.trim().replace("https://www.dhhs.vic.gov.au/", "/"))
        // Off-site links are covered by the historical releases.
        .filter(|uri| uri.starts_with('/'))
        .filter(|uri| !uri.contains("cho-victoria-2-april-2020"))
        .collect()
}

/// COVID-19 release links on the historical media centre listing.
pub fn historical_links(page: &str) -> Vec<Url> {
    // ---
    let html = Html::parse_document(page);
    html.select(&HISTORICAL_ITEM)
        .filter(|li| {
            let title: String = li.select(&H3).next().map(|h| h.text().collect()).unwrap_or_default();
            title.contains("COVID-19") || title.to_lowercase().contains("coronavirus")
        })
        .filter_map(|li| li.select(&LINK).next()?.value().attr("href"))
        .filter_map(|href| absolute_url(HISTORICAL_LISTING_URL, href))
        .collect()
}

/// Parse a media hub release into its date and figures.
///
/// The date sits on the second line of `div.first-line`, or after the
/// last " - " of the heading, and often omits the year.
pub fn parse_media_release(page: &str, name: &str) -> Option<(NaiveDate, ReleaseFigures)> {
    // ---
    let html = Html::parse_document(page);
    let Some(layout) = html.select(&LAYOUT_REGION).next() else {
        warn!("{} has no layout region, please check if it is a parseable release", name);
        return None;
    };

    let from_first_line = layout.select(&FIRST_LINE).next().and_then(|div| {
        let text: String = div.text().collect();
        text.trim().split('\n').nth(1).map(str::to_string)
    });
    let date_text = from_first_line.or_else(|| {
        let heading = html.select(&H1).next().map(text_of)?;
        heading.split(" - ").last().map(str::to_string)
    });
    let Some(date_text) = date_text else {
        warn!("{} was not parseable, please check if it is intended to be a parseable release", name);
        return None;
    };

    let Some(date) = media_release_date(&date_text) else {
        warn!("Invalid date {:?} in {}, skipping", date_text, name);
        return None;
    };

    let body = layout.select(&PAGE_CONTENT).next().map(text_of).unwrap_or_default();
    Some((date, parse_fulltext(&body)))
}

fn media_release_date(text: &str) -> Option<NaiveDate> {
    // ---
    let mut text = text.split(',').last().unwrap_or_default().trim().to_string();
    if text.matches(' ').count() < 2 || !text.contains(" 202") {
        text.push_str(" 2020");
    }
    parse_full_date(&text)
}

/// Parse a historical media centre release.
///
/// Releases up to 2020-03-15 often state no totals and are skipped; a
/// later one without tested and confirmed counts is an error.
pub fn parse_historical_release(
    page: &str,
    name: &str,
) -> Result<Option<(NaiveDate, ReleaseFigures)>, PipelineError> {
    // ---
    let html = Html::parse_document(page);
    let Some(date) = html
        .select(&PAGE_DATE)
        .next()
        .and_then(|d| parse_full_date(&text_of(d)))
    else {
        warn!("No page date in {}, skipping", name);
        return Ok(None);
    };

    let body = html.select(&MAIN).next().map(text_of).unwrap_or_default();
    let figures = parse_fulltext(&body);

    if figures.tested.is_some() && figures.confirmed.is_some() {
        return Ok(Some((date, figures)));
    }
    if NaiveDate::from_ymd_opt(2020, 3, 15).is_some_and(|cutoff| date <= cutoff) {
        return Ok(None);
    }
    Err(PipelineError::UnparseableRelease {
        date,
        reason: format!("{name} states no tested and confirmed counts"),
    })
}

fn text_of(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use rstest::rstest;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_parse_fulltext() {
        // ---
        let body = "The total number of coronavirus (COVID-19) cases in Victoria is 1,241.\u{a0}\
            Victoria has recorded eleven deaths related to coronavirus. \
            More than 61,000 tests have been conducted. \
            Currently 44 people are in hospital, including 15 patients in intensive care, \
            and 926 people have recovered from the virus.";

        assert_eq!(
            parse_fulltext(body),
            ReleaseFigures {
                confirmed: Some(1241),
                tested: Some(61_000),
                deaths: Some(11),
                recovered: Some(926),
                hospitalized: Some(44),
                icu: Some(15),
            }
        );
    }

    #[rstest]
    #[case("Of the total 1,135 cases, 23 have been in hospital.", Some(1135))]
    #[case("the total number of cases increased to 821 today", Some(821))]
    #[case("No figures today.", None)]
    fn test_confirmed_phrasings(#[case] body: &str, #[case] expected: Option<i64>) {
        // ---
        assert_eq!(parse_fulltext(body).confirmed, expected);
    }

    #[rstest]
    #[case("To date, three people have died from coronavirus in Victoria.", Some(3))]
    #[case("taking the number of people who have died in Victoria from coronavirus to 14.", Some(14))]
    fn test_death_phrasings(#[case] body: &str, #[case] expected: Option<i64>) {
        // ---
        assert_eq!(parse_fulltext(body).deaths, expected);
    }

    #[rstest]
    #[case("Friday 24 April", date(2020, 4, 24))]
    #[case("Media release, 5 April 2020", date(2020, 4, 5))]
    #[case("Tuesday, 21 May", date(2020, 5, 21))]
    fn test_media_release_date(#[case] text: &str, #[case] expected: NaiveDate) {
        // ---
        assert_eq!(media_release_date(text), Some(expected));
    }

    #[test]
    fn test_parse_media_release() {
        // ---
        let page = r#"<div class="layout__region">
              <div class="first-line">Media release
Friday 24 April</div>
              <div class="page-content"><p>The total number of cases in Victoria is 1,346.
              More than 84,000 tests have been processed.</p></div>
            </div>"#;

        let (d, figures) = parse_media_release(page, "fixture").unwrap();
        assert_eq!(d, date(2020, 4, 24));
        assert_eq!(figures.confirmed, Some(1346));
        assert_eq!(figures.tested, Some(84_000));
    }

    #[test]
    fn test_media_release_heading_date() {
        // ---
        let page = r#"<h1>Coronavirus update for Victoria - 21 May 2020</h1>
            <div class="layout__region"><div class="page-content">nothing</div></div>"#;
        let (d, figures) = parse_media_release(page, "fixture").unwrap();
        assert_eq!(d, date(2020, 5, 21));
        assert_eq!(figures, ReleaseFigures::default());
    }

    #[test]
    fn test_media_hub_uris() {
        // ---
        let page = r#"<div class="page-content"><ul>
              <li><a href="https://www.dhhs.vic.gov.au/coronavirus-update-victoria-3-june-2020">Update</a> Department of Health and Human Services media release</li>
              <li><a href="/cho-victoria-2-april-2020">CHO</a> Department of Health and Human Services media release</li>
              <li><a href="/update-repatriation">Flights</a> Department of Health and Human Services media release - repatriation flights</li>
              <li><a href="https://www2.health.vic.gov.au/x">Elsewhere</a> Department of Health and Human Services media release</li>
              <li><a href="/premier">Premier</a> Premier's statement</li>
            </ul></div>"#;

        assert_eq!(media_hub_uris(page), vec!["/coronavirus-update-victoria-3-june-2020"]);
    }

    #[test]
    fn test_historical_links() {
        // ---
        let page = r#"<ol class="listing">
              <li><a href="/about/media-centre/MediaReleases/coronavirus-update-19-march"><h3>Coronavirus update for Victoria</h3></a></li>
              <li><a href="/about/media-centre/MediaReleases/mushrooms"><h3>Poisonous mushrooms sprouting early</h3></a></li>
            </ol>"#;

        let links = historical_links(page);
        assert_eq!(links.len(), 1);
        assert_eq!(
            links[0].as_str(),
            "https://www2.health.vic.gov.au/about/media-centre/MediaReleases/coronavirus-update-19-march"
        );
    }

    #[test]
    fn test_parse_historical_release() {
        // ---
        let page = |day: &str, body: &str| {
            format!(r#"<div class="page-date">{day}</div><div id="main">{body}</div>"#)
        };

        let ok = page(
            "19 Mar 2020",
            "The total number of cases in Victoria is 229. Over 10,000 Victorians have been tested to date.",
        );
        let (d, figures) = parse_historical_release(&ok, "fixture").unwrap().unwrap();
        assert_eq!(d, date(2020, 3, 19));
        assert_eq!(figures.confirmed, Some(229));
        assert_eq!(figures.tested, Some(10_000));

        let early = page("10 Mar 2020", "A ninth case was confirmed.");
        assert_eq!(parse_historical_release(&early, "fixture").unwrap(), None);

        let late = page("20 Mar 2020", "A case was confirmed.");
        assert!(matches!(
            parse_historical_release(&late, "fixture"),
            Err(PipelineError::UnparseableRelease { .. })
        ));
    }
}
