//! Reference scenarios for the CATS application
//!
//! The selectors follow the application's current markup. Several are
//! positional (`nth-child`) because the app exposes no stable test ids for
//! those controls; if the layout changes they must be updated here.

use crate::error::HarnessResult;
use crate::fixture::SeedDataset;
use crate::scenario::Scenario;
use crate::selector::Selector;
use crate::wait::WaitCondition;

const CAT_SCHEMA: &str = include_str!("../fixtures/cat-schema.sql");
const CAT_DATA: &str = include_str!("../fixtures/cat-data.sql");

/// Name of the record present in the seed data
pub const SEEDED_CAT: &str = "Mr Bigglesworth";

const TITLE: &str = "body > header > h1";
const CREATE_NAME: &str = "#catName";
const CREATE_LENGTH: &str = "#catLength";
const CREATE_WHISKERS: &str = "#catWhiskers";
const CREATE_EVIL: &str = "#catEvil";
const CREATE_SUBMIT: &str = "#catForm > div.mt-3 > button.btn.btn-success";
const FIRST_CARD: &str = "#output > div > div";
const FIRST_CARD_BODY: &str = "#output > div > div > div";
const SECOND_CARD: &str = "#output > div:nth-child(2) > div > div";
const UPDATE_BUTTON: &str = "#output > div > div > div > button:nth-child(5)";
const UPDATE_NAME: &str = "#updateForm > #catName";
const UPDATE_LENGTH: &str = "#updateForm > #catLength";
const UPDATE_WHISKERS: &str = "#updateForm > div:nth-child(5) > #catWhiskers";
const UPDATE_EVIL: &str = "#updateForm > div:nth-child(6) > #catEvil";
const UPDATE_SUBMIT: &str = "#updateForm > div.mt-3 > button.btn.btn-success";
const MODAL_CLOSE: &str = "#myModal > div > div > div.modal-header > button";

/// Schema plus one seeded cat
pub fn seed_dataset() -> SeedDataset {
    SeedDataset::from_statements([CAT_SCHEMA, CAT_DATA])
}

fn clickable(css: &str) -> HarnessResult<WaitCondition> {
    Ok(WaitCondition::clickable(Selector::css(css)?))
}

/// The page header reads exactly "CATS"
pub fn title() -> HarnessResult<Scenario> {
    Scenario::builder("title")
        .description("Application title is rendered")
        .tag("smoke")
        .navigate("/")
        .wait_for("title", WaitCondition::present(Selector::css(TITLE)?))
        .assert_text_equals("title", "CATS")
        .build()
}

/// Fill the create form and find the new card
pub fn create() -> HarnessResult<Scenario> {
    Scenario::builder("create")
        .description("A created cat is listed with its fields")
        .tag("crud")
        .navigate("/")
        .wait_for("name", clickable(CREATE_NAME)?)
        .type_into("name", "David Meowie")
        .wait_for("length", clickable(CREATE_LENGTH)?)
        .type_into("length", "22")
        .wait_for("whiskers", clickable(CREATE_WHISKERS)?)
        .click("whiskers")
        .wait_for("evil", clickable(CREATE_EVIL)?)
        .click("evil")
        .wait_for("submit", clickable(CREATE_SUBMIT)?)
        .click("submit")
        .wait_for("card", clickable(SECOND_CARD)?)
        .assert_contains(
            "card",
            ["David Meowie", "Length: 22", "Whiskers: true", "Evil: true"],
        )
        .build()
}

/// The seeded record is rendered as the first card
pub fn read_seeded() -> HarnessResult<Scenario> {
    Scenario::builder("read_seeded")
        .description("Seed data is listed on load")
        .tag("crud")
        .tag("smoke")
        .navigate("/")
        .wait_for("card", clickable(FIRST_CARD)?)
        .assert_contains("card", [SEEDED_CAT])
        .build()
}

/// Edit the seeded cat through the update modal
pub fn update() -> HarnessResult<Scenario> {
    Scenario::builder("update")
        .description("Updating a cat re-renders its card")
        .tag("crud")
        .navigate("/")
        .wait_for("update", clickable(UPDATE_BUTTON)?)
        .click("update")
        .wait_for("name", clickable(UPDATE_NAME)?)
        .clear("name")
        .type_into("name", "Catrick Swayze")
        .wait_for("length", clickable(UPDATE_LENGTH)?)
        .clear("length")
        .type_into("length", "12")
        // The modal is open by now; the checkboxes need no wait
        .find("whiskers", Selector::css(UPDATE_WHISKERS)?)
        .click("whiskers")
        .find("evil", Selector::css(UPDATE_EVIL)?)
        .click("evil")
        .wait_for("submit", clickable(UPDATE_SUBMIT)?)
        .click("submit")
        .wait_for("close", clickable(MODAL_CLOSE)?)
        .click("close")
        // The card exists before the update lands, so wait on its new text
        .wait_for(
            "card",
            WaitCondition::text_contains(Selector::css(FIRST_CARD_BODY)?, "Catrick Swayze"),
        )
        .assert_contains(
            "card",
            ["Catrick Swayze", "Length: 12", "Whiskers: false", "Evil: false"],
        )
        .build()
}

/// All reference scenarios, in run order
pub fn all() -> HarnessResult<Vec<Scenario>> {
    Ok(vec![title()?, create()?, read_seeded()?, update()?])
}

/// In-memory rendition of the CATS page for driving the catalog without a
/// browser
#[cfg(test)]
pub(crate) mod page {
    use super::*;
    use crate::driver::scripted::{PageModel, ScriptedDriver};

    fn card_text(name: &str, length: &str, whiskers: bool, evil: bool) -> String {
        format!(
            "{}\nLength: {}\nWhiskers: {}\nEvil: {}\nUpdate Delete",
            name, length, whiskers, evil
        )
    }

    fn set_card(page: &mut PageModel, text: &str) {
        page.set_text(FIRST_CARD, text);
        page.set_text(FIRST_CARD_BODY, text);
    }

    const MODAL: [&str; 6] = [
        UPDATE_NAME,
        UPDATE_LENGTH,
        UPDATE_WHISKERS,
        UPDATE_EVIL,
        UPDATE_SUBMIT,
        MODAL_CLOSE,
    ];

    fn show_modal(page: &mut PageModel, visible: bool) {
        for css in MODAL {
            page.set_visible(css, visible);
        }
    }

    /// A freshly seeded CATS page
    pub fn seeded() -> ScriptedDriver {
        let driver = ScriptedDriver::new();
        {
            let mut page = driver.page();
            page.add(TITLE, "CATS");

            page.add_input(CREATE_NAME, "");
            page.add_input(CREATE_LENGTH, "");
            page.add(CREATE_WHISKERS, "");
            page.add(CREATE_EVIL, "");
            page.add(CREATE_SUBMIT, "Submit");

            let seeded = card_text(SEEDED_CAT, "10", true, true);
            page.add(FIRST_CARD, &seeded);
            page.add(FIRST_CARD_BODY, &seeded);
            page.add(UPDATE_BUTTON, "Update");

            page.add_input(UPDATE_NAME, SEEDED_CAT);
            page.add_input(UPDATE_LENGTH, "10");
            page.add(UPDATE_WHISKERS, "");
            page.add(UPDATE_EVIL, "");
            page.set_checked(UPDATE_WHISKERS, true);
            page.set_checked(UPDATE_EVIL, true);
            page.add(UPDATE_SUBMIT, "Submit");
            page.add(MODAL_CLOSE, "×");
            show_modal(&mut page, false);

            for checkbox in [CREATE_WHISKERS, CREATE_EVIL, UPDATE_WHISKERS, UPDATE_EVIL] {
                page.on_click(checkbox, move |p| p.toggle(checkbox));
            }

            page.on_click(CREATE_SUBMIT, |p| {
                let text = card_text(
                    p.text_by_css(CREATE_NAME).unwrap_or_default(),
                    p.text_by_css(CREATE_LENGTH).unwrap_or_default(),
                    p.is_checked(CREATE_WHISKERS),
                    p.is_checked(CREATE_EVIL),
                );
                p.add(SECOND_CARD, &text);
            });

            page.on_click(UPDATE_BUTTON, |p| show_modal(p, true));

            page.on_click(UPDATE_SUBMIT, |p| {
                let text = card_text(
                    p.text_by_css(UPDATE_NAME).unwrap_or_default(),
                    p.text_by_css(UPDATE_LENGTH).unwrap_or_default(),
                    p.is_checked(UPDATE_WHISKERS),
                    p.is_checked(UPDATE_EVIL),
                );
                set_card(p, &text);
            });

            page.on_click(MODAL_CLOSE, |p| show_modal(p, false));
        }
        driver
    }
}
