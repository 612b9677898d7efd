//! Element operations. Every function takes a registry handle first and
//! throws the stale marker when the handle no longer resolves.

pub const QUERY: &str = r#"
(scope, selector) => {
    const rt = window.__cmpilot;
    const root = scope === null ? document : rt.element(scope);
    let found;
    try {
        found = root.querySelectorAll(selector);
    } catch (e) {
        return { handles: [], invalid: String(e && e.message || e) };
    }
    return { handles: Array.from(found, rt.handle), invalid: null };
}
"#;

pub const TEXT: &str = r#"
(id) => window.__cmpilot.element(id).textContent || ''
"#;

pub const STYLE: &str = r#"
(id, property) => {
    const style = window.getComputedStyle(window.__cmpilot.element(id));
    return style.getPropertyValue(property) || style[property] || '';
}
"#;

pub const RECT: &str = r#"
(id) => {
    const r = window.__cmpilot.element(id).getBoundingClientRect();
    return { x: r.x, y: r.y, width: r.width, height: r.height };
}
"#;

pub const NESTED: &str = r#"
(id) => {
    window.__cmpilot.element(id);
    return window.top !== window.self;
}
"#;

pub const CHECKED: &str = r#"
(id) => !!window.__cmpilot.element(id).checked
"#;

pub const SCROLL_INTO_VIEW: &str = r#"
(id) => {
    window.__cmpilot.element(id).scrollIntoView({ block: 'center' });
    return true;
}
"#;

pub const FOCUS: &str = r#"
(id) => {
    window.__cmpilot.element(id).focus();
    return true;
}
"#;

pub const CLICK: &str = r#"
(id, openInTab) => {
    const el = window.__cmpilot.element(id);
    if (openInTab) {
        el.dispatchEvent(new MouseEvent('click', {
            bubbles: true,
            cancelable: true,
            view: window,
            ctrlKey: true,
            shiftKey: true
        }));
    } else {
        el.click();
    }
    return true;
}
"#;

pub const POINTER: &str = r#"
(id, type, x, y) => {
    window.__cmpilot.element(id).dispatchEvent(new MouseEvent(type, {
        bubbles: true,
        cancelable: true,
        view: window,
        clientX: x,
        clientY: y
    }));
    return true;
}
"#;

pub const SET_HIDDEN: &str = r#"
(id, hidden, hiderClass) => {
    const rt = window.__cmpilot;
    const el = rt.element(id);
    if (hidden) rt.ensureHider();
    el.classList.toggle(hiderClass, hidden);
    return true;
}
"#;

pub const PAINT: &str = r#"
(id, passed) => {
    const el = window.__cmpilot.element(id);
    el.style.setProperty('outline', passed ? '3px solid #2e7d32' : '3px solid #c62828', 'important');
    el.style.setProperty('outline-offset', '-2px', 'important');
    return true;
}
"#;
