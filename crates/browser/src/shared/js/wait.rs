pub const CHECK_LOADING: &str = r#"
() => ({
    readyState: document.readyState,
    activeRequests: performance.getEntriesByType('resource').filter(r => !r.responseEnd).length
})
"#;
