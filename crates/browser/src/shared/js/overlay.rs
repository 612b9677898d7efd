pub const SHOW_PROGRESS: &str = r#"
(message) => {
    const OWN = window.__cmpilot.OWN;
    let overlay = document.querySelector('[' + OWN + '="progress"]');
    if (!overlay) {
        overlay = document.createElement('div');
        overlay.setAttribute(OWN, 'progress');
        overlay.style.cssText = [
            'position: fixed', 'inset: 0', 'z-index: 2147483647',
            'display: flex', 'align-items: center', 'justify-content: center',
            'background: rgba(0, 0, 0, 0.45)', 'color: #fff',
            'font: 16px/1.4 sans-serif'
        ].join(';');
        (document.body || document.documentElement).appendChild(overlay);
    }
    overlay.textContent = message;
    return true;
}
"#;

pub const HIDE_PROGRESS: &str = r#"
() => {
    const OWN = window.__cmpilot.OWN;
    document.querySelectorAll('[' + OWN + '="progress"]').forEach((el) => el.remove());
    return true;
}
"#;
