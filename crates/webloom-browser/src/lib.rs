//! Browser sessions over the W3C WebDriver protocol.
//!
//! Works with any conforming driver (geckodriver, chromedriver, a Selenium
//! grid). Each page is its own WebDriver session.

pub mod page;
pub mod provider;
pub mod webdriver;

pub use page::WebDriverPage;
pub use provider::WebDriverProvider;
pub use webdriver::WebDriverClient;
